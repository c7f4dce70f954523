//! Template directives and their registry.
//!
//! A directive is a tagged, parameterized template node
//! (`{"@mapped": {...}}`) that the mapper expands into a value. Each
//! directive kind declares its required parameters and a factory; the mapper
//! checks the parameter table, constructs a transient directive object for
//! the node, and drives it through the two-step contract: `prepare` (during
//! the first template walk, to register any keys it needs) and `call`
//! (during the second walk, to produce its value).

mod mapped;
mod ops;
mod reformatted;

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, RwLock};

use serde_json::{Map, Value};

pub use mapped::Mapped;
pub use ops::BinOp;
pub use reformatted::Reformatted;

use crate::context::Context;
use crate::error::MetadataMapperError;
use crate::source::SourceMap;

/// A directive node's behavior, created per node per walk and discarded.
pub trait TemplateDirective: fmt::Debug {
    /// Register any keys this directive will need. Called once per node
    /// during the prepare pass; defaults to a no-op because most directives
    /// need no pre-fetch.
    fn prepare(&self, sources: &mut SourceMap) -> Result<(), MetadataMapperError> {
        let _ = sources;
        Ok(())
    }

    /// Produce this node's value. Called during the replace pass, after all
    /// parameters have been reduced to concrete values.
    fn call(&self, sources: &SourceMap) -> Result<Value, MetadataMapperError>;
}

/// Factory signature for directive kinds. Receives the (already replaced)
/// directive body; unexpected extra parameters must be ignored for forward
/// compatibility.
pub type DirectiveFactory = fn(
    &Context,
    &SourceMap,
    &Map<String, Value>,
) -> Result<Box<dyn TemplateDirective>, MetadataMapperError>;

/// A registered directive kind: its required-parameter table plus factory.
#[derive(Clone, Copy)]
pub struct DirectiveSpec {
    pub required: &'static [&'static str],
    pub build: DirectiveFactory,
}

static DIRECTIVE_REGISTRY: LazyLock<RwLock<HashMap<String, DirectiveSpec>>> =
    LazyLock::new(|| {
        let mut registry = HashMap::new();
        registry.insert(
            "mapped".to_string(),
            DirectiveSpec {
                required: &["key", "source"],
                build: Mapped::build,
            },
        );
        registry.insert(
            "reformatted".to_string(),
            DirectiveSpec {
                required: &["format", "key", "value"],
                build: Reformatted::build,
            },
        );
        for (tag, build) in [
            ("add", ops::build_add as DirectiveFactory),
            ("sub", ops::build_sub),
            ("mul", ops::build_mul),
            ("truediv", ops::build_truediv),
            ("floordiv", ops::build_floordiv),
        ] {
            registry.insert(
                tag.to_string(),
                DirectiveSpec {
                    required: &["left", "right"],
                    build,
                },
            );
        }
        RwLock::new(registry)
    });

/// Register a directive kind under a tag (without the marker prefix).
pub fn register_directive(tag: impl Into<String>, spec: DirectiveSpec) {
    DIRECTIVE_REGISTRY
        .write()
        .expect("directive registry poisoned")
        .insert(tag.into(), spec);
}

/// Look up a directive kind by tag.
pub fn directive_spec(tag: &str) -> Option<DirectiveSpec> {
    DIRECTIVE_REGISTRY
        .read()
        .expect("directive registry poisoned")
        .get(tag)
        .copied()
}

/// Extract a required string parameter from a directive body.
fn string_param<'a>(
    params: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, MetadataMapperError> {
    let value = params
        .get(name)
        .ok_or_else(|| MetadataMapperError::Directive(format!("missing key: '{name}'")))?;
    value.as_str().ok_or_else(|| {
        MetadataMapperError::Directive(format!(
            "{name} must be a string but got '{}'",
            crate::value::json_type_name(value)
        ))
    })
}

/// Build a [`Key`](crate::Key) from a directive's `key` and `key_options`
/// parameters.
fn key_param(params: &Map<String, Value>) -> Result<crate::Key, MetadataMapperError> {
    let key = string_param(params, "key")?;

    let options = match params.get("key_options") {
        None => return Ok(crate::Key::new(key)),
        Some(value) => value.as_object().ok_or_else(|| {
            MetadataMapperError::Directive(format!(
                "key_options must be an object but got '{}'",
                crate::value::json_type_name(value)
            ))
        })?,
    };

    Ok(crate::Key::from_options(key, options)?)
}
