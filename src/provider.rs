//! Source providers: where a resolution run's sources come from.
//!
//! [`StaticSourceProvider`] wraps an already-constructed source map for
//! programmatic use; [`ConfigSourceProvider`] builds the map from untyped
//! JSON configuration, dispatching `class` tags through the source, storage
//! and format registries and wrapping `$`-prefixed strings as deferred
//! context values.

use std::fmt;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::SourceProviderError;
use crate::source::{Source, SourceMap, source_from_config};

/// Yields the named sources for one resolution run.
///
/// Each call must produce fresh source instances: sources carry per-run
/// state (the pending key set and the result cache).
pub trait SourceProvider: fmt::Debug {
    fn get_sources(&self) -> Result<SourceMap, SourceProviderError>;
}

/// A provider that hands out clones of an existing source map.
#[derive(Debug, Clone, Default)]
pub struct StaticSourceProvider {
    sources: SourceMap,
}

impl StaticSourceProvider {
    pub fn new(sources: SourceMap) -> Self {
        Self { sources }
    }

    /// Add a named source, builder style.
    pub fn with_source(mut self, name: impl Into<String>, source: Box<dyn Source>) -> Self {
        self.sources.insert(name.into(), source);
        self
    }
}

impl SourceProvider for StaticSourceProvider {
    fn get_sources(&self) -> Result<SourceMap, SourceProviderError> {
        Ok(self
            .sources
            .iter()
            .map(|(name, source)| (name.clone(), source.clone_source()))
            .collect())
    }
}

/// Builds sources from an untyped configuration mapping (as loaded from
/// JSON): source name to source configuration.
///
/// Construction failures are wrapped with the offending source key so a
/// large configuration stays debuggable.
#[derive(Debug, Clone)]
pub struct ConfigSourceProvider {
    config: Map<String, Value>,
}

impl ConfigSourceProvider {
    pub fn new(config: Map<String, Value>) -> Self {
        Self { config }
    }

    /// Convenience constructor accepting any JSON value; non-object values
    /// are rejected at `get_sources` time.
    pub fn from_value(config: Value) -> Self {
        match config {
            Value::Object(map) => Self::new(map),
            other => {
                let mut map = Map::new();
                map.insert("<config>".to_string(), other);
                Self::new(map)
            }
        }
    }
}

impl SourceProvider for ConfigSourceProvider {
    fn get_sources(&self) -> Result<SourceMap, SourceProviderError> {
        self.config
            .iter()
            .map(|(name, config)| {
                debug!(source = %name, "building source from config");
                let source = build_source(config).map_err(|e| e.for_source(name))?;
                Ok((name.clone(), source))
            })
            .collect()
    }
}

fn build_source(config: &Value) -> Result<Box<dyn Source>, SourceProviderError> {
    let config = config
        .as_object()
        .ok_or_else(|| SourceProviderError::InvalidArgument {
            name: "<config>".to_string(),
            reason: format!(
                "must be an object, got {}",
                crate::value::json_type_name(config)
            ),
        })?;
    source_from_config(config)
}

/// Reject configuration fields outside a kind's declared field table.
///
/// Every constructible kind validates its arguments against an explicit
/// list; unknown fields fail fast rather than being silently dropped.
pub(crate) fn check_fields(
    args: &Map<String, Value>,
    allowed: &[&str],
) -> Result<(), SourceProviderError> {
    for key in args.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(SourceProviderError::UnexpectedArgument(key.clone()));
        }
    }
    Ok(())
}
