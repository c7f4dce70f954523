//! The metadata mapper: template walking and run orchestration.
//!
//! [`MetadataMapper::get_metadata`] drives a resolution run through four
//! phases:
//!
//! 1. obtain sources from the provider and resolve their deferred
//!    context values against the context snapshot,
//! 2. walk the template once, constructing every directive found and
//!    calling its `prepare` hook (populating each source's pending key set),
//! 3. run each source's single batched query (source order is arbitrary;
//!    sources are independent of each other),
//! 4. walk the template a second time bottom-up, replacing each directive
//!    node with its `call` result.
//!
//! Errors carry a `$`-rooted debug path identifying the offending node in
//! the original template.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::context::Context;
use crate::directive::{TemplateDirective, directive_spec};
use crate::error::{MetadataMapperError, TemplateError};
use crate::provider::SourceProvider;
use crate::source::SourceMap;

/// Resolves a declarative template into a concrete metadata record.
///
/// A mapping node in the template is a *directive node* iff exactly one of
/// its keys starts with the directive marker (default `@`). Templates
/// without directive nodes pass through unchanged.
///
/// ```
/// use metamap::{Context, MetadataMapper};
/// use serde_json::json;
///
/// let mapper = MetadataMapper::new(json!({"Name": "constant"}));
/// let record = mapper.get_metadata(&Context::new()).unwrap();
/// assert_eq!(record, json!({"Name": "constant"}));
/// ```
#[derive(Debug)]
pub struct MetadataMapper {
    template: Value,
    source_provider: Option<Box<dyn SourceProvider>>,
    directive_marker: String,
}

impl MetadataMapper {
    pub fn new(template: Value) -> Self {
        Self {
            template,
            source_provider: None,
            directive_marker: "@".to_string(),
        }
    }

    pub fn with_source_provider(mut self, provider: impl SourceProvider + 'static) -> Self {
        self.source_provider = Some(Box::new(provider));
        self
    }

    /// Use a different directive marker. Any non-empty string works; nodes
    /// are recognized by prefix match against this exact string.
    pub fn with_directive_marker(mut self, marker: impl Into<String>) -> Self {
        self.directive_marker = marker.into();
        self
    }

    /// Resolve the template against a context, returning the concrete
    /// record.
    pub fn get_metadata(&self, context: &Context) -> Result<Value, MetadataMapperError> {
        let mut sources = match &self.source_provider {
            Some(provider) => provider.get_sources()?,
            None => SourceMap::new(),
        };

        let snapshot = context.snapshot();
        for (name, source) in sources.iter_mut() {
            source.resolve_context_values(&snapshot).map_err(|e| {
                MetadataMapperError::ContextSubstitution {
                    name: name.clone(),
                    source: e,
                }
            })?;
        }

        self.cache_source_keys(context, &mut sources)
            .map_err(|e| match e {
                MetadataMapperError::Template(_) => e,
                other => MetadataMapperError::CacheKeys(Box::new(other)),
            })?;

        for (name, source) in sources.iter_mut() {
            info!(source = %name, "querying source");
            source
                .query_all_values(context)
                .map_err(|e| MetadataMapperError::QuerySource {
                    name: name.clone(),
                    source: Box::new(e),
                })?;
        }

        self.replace_template(context, &self.template, &sources, "$")
            .map_err(|e| match e {
                MetadataMapperError::Template(_) => e,
                other => MetadataMapperError::EvaluateTemplate(Box::new(other)),
            })
    }

    /// First walk: construct and prepare every directive node, anywhere in
    /// the template (including nested inside another directive's body).
    fn cache_source_keys(
        &self,
        context: &Context,
        sources: &mut SourceMap,
    ) -> Result<(), MetadataMapperError> {
        self.prepare_walk(context, &self.template, sources, "$")
    }

    fn prepare_walk(
        &self,
        context: &Context,
        node: &Value,
        sources: &mut SourceMap,
        path: &str,
    ) -> Result<(), MetadataMapperError> {
        match node {
            Value::Object(map) => {
                if let Some((name, body)) = self.classify(map, path)? {
                    debug!(directive = name, path, "preparing directive");
                    let directive = self.build_directive(context, sources, name, body, path)?;
                    directive.prepare(sources)?;
                }
                for (key, value) in map {
                    self.prepare_walk(context, value, sources, &format!("{path}.{key}"))?;
                }
            }
            Value::Array(items) => {
                for (index, value) in items.iter().enumerate() {
                    self.prepare_walk(context, value, sources, &format!("{path}[{index}]"))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Second walk: rebuild the template bottom-up, substituting directive
    /// results. Directive bodies are replaced before the directive is
    /// constructed, so a parameter may itself be a directive node.
    fn replace_template(
        &self,
        context: &Context,
        node: &Value,
        sources: &SourceMap,
        path: &str,
    ) -> Result<Value, MetadataMapperError> {
        match node {
            Value::Object(map) => {
                if let Some((name, body)) = self.classify(map, path)? {
                    let debug_path = format!("{path}.{name}");

                    let mut replaced = Map::new();
                    for (key, value) in body {
                        replaced.insert(
                            key.clone(),
                            self.replace_template(
                                context,
                                value,
                                sources,
                                &format!("{debug_path}.{key}"),
                            )?,
                        );
                    }

                    let directive =
                        self.build_directive(context, sources, name, &replaced, path)?;
                    return directive.call(sources).map_err(|e| match e {
                        MetadataMapperError::Template(_) => e,
                        other => MetadataMapperError::CallDirective {
                            debug_path,
                            source: Box::new(other),
                        },
                    });
                }

                let mut out = Map::new();
                for (key, value) in map {
                    out.insert(
                        key.clone(),
                        self.replace_template(context, value, sources, &format!("{path}.{key}"))?,
                    );
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    self.replace_template(context, value, sources, &format!("{path}[{index}]"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            constant => Ok(constant.clone()),
        }
    }

    /// Decide whether a mapping node is a directive node.
    ///
    /// Exactly one marker-prefixed key whose value is a mapping makes a
    /// directive node; zero marker keys makes a structural node; anything
    /// else is a template error.
    fn classify<'a>(
        &self,
        map: &'a Map<String, Value>,
        path: &str,
    ) -> Result<Option<(&'a str, &'a Map<String, Value>)>, MetadataMapperError> {
        let directive_keys: Vec<&String> = map
            .keys()
            .filter(|key| key.starts_with(&self.directive_marker))
            .collect();

        let name = match directive_keys.as_slice() {
            [] => return Ok(None),
            [name] => name.as_str(),
            names => {
                let listing = names
                    .iter()
                    .map(|name| format!("'{name}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(TemplateError::new(
                    format!("multiple directives found in config: {listing}"),
                    path,
                )
                .into());
            }
        };

        match &map[name] {
            Value::Object(body) => Ok(Some((name, body))),
            other => Err(TemplateError::new(
                format!(
                    "directive body should be type 'object' not '{}'",
                    crate::value::json_type_name(other)
                ),
                format!("{path}.{name}"),
            )
            .into()),
        }
    }

    /// Look up a directive's registry entry, check its required-parameter
    /// table, and construct it. Construction failures become template
    /// errors carrying the node's debug path.
    fn build_directive(
        &self,
        context: &Context,
        sources: &SourceMap,
        name: &str,
        body: &Map<String, Value>,
        node_path: &str,
    ) -> Result<Box<dyn TemplateDirective>, MetadataMapperError> {
        let debug_path = format!("{node_path}.{name}");

        let tag = name
            .strip_prefix(&self.directive_marker)
            .unwrap_or(name);
        let spec = directive_spec(tag).ok_or_else(|| {
            TemplateError::new(format!("invalid directive '{name}'"), debug_path.clone())
        })?;

        let mut missing: Vec<&str> = spec
            .required
            .iter()
            .filter(|param| !body.contains_key(**param))
            .copied()
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            let plural = if missing.len() > 1 { "s" } else { "" };
            let listing = missing
                .iter()
                .map(|param| format!("'{param}'"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(TemplateError::new(
                format!("missing key{plural}: {listing}"),
                debug_path,
            )
            .into());
        }

        // Unexpected extra parameters are ignored for forward compatibility.
        (spec.build)(context, sources, body).map_err(|e| match e {
            MetadataMapperError::Template(_) => e,
            other => TemplateError::new(other.to_string(), debug_path).into(),
        })
    }
}
