//! Deferred configuration values and context-value substitution.
//!
//! Provider configuration may contain *placeholders*: string values that
//! begin with the `$` sentinel and name a path into the run's
//! [`Context`](crate::Context) snapshot (`"$.meta.collection_name"`). A
//! [`ConfigValue`] graph carries those placeholders through object
//! construction, and one dedicated substitution pass
//! ([`replace_context_values`]) resolves them all against the context before
//! any source is queried. Placeholders are never evaluated ad hoc at
//! arbitrary call sites.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Number, Value};

use crate::error::ContextValueError;
use crate::jsonpath;

/// A JSON-shaped configuration value that may contain deferred
/// context-value placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<ConfigValue>),
    Mapping(BTreeMap<String, ConfigValue>),
    /// Deferred lookup of a context path, e.g. `$.meta.provider`.
    Context(String),
}

impl ConfigValue {
    /// A placeholder resolving `path` against the context snapshot.
    pub fn context(path: impl Into<String>) -> Self {
        Self::Context(path.into())
    }

    /// An empty mapping.
    pub fn empty_mapping() -> Self {
        Self::Mapping(BTreeMap::new())
    }

    /// Convert a plain JSON value verbatim. No sentinel processing: strings
    /// beginning with `$` stay literal strings.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Sequence(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert an untyped configuration value, applying the sentinel rules:
    /// a string beginning with `$` becomes a [`ConfigValue::Context`]
    /// placeholder, and a leading `$$` unwraps to a single literal `$`.
    pub fn from_config(value: &Value) -> Self {
        match value {
            Value::String(s) if s.starts_with("$$") => Self::String(s[1..].to_string()),
            Value::String(s) if s.starts_with('$') => Self::Context(s.clone()),
            Value::Array(items) => Self::Sequence(items.iter().map(Self::from_config).collect()),
            Value::Object(map) => Self::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_config(v)))
                    .collect(),
            ),
            other => Self::from_json(other),
        }
    }

    /// Convert back to a plain JSON value. Returns `None` if any placeholder
    /// remains unresolved anywhere in the graph.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Null => Some(Value::Null),
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Number(n) => Some(Value::Number(n.clone())),
            Self::String(s) => Some(Value::String(s.clone())),
            Self::Sequence(items) => items
                .iter()
                .map(Self::to_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Mapping(map) => map
                .iter()
                .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                .collect::<Option<Map<_, _>>>()
                .map(Value::Object),
            Self::Context(_) => None,
        }
    }

    /// Resolve every placeholder in this graph in place.
    pub fn resolve(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        *self = replace_context_values(self, snapshot)?;
        Ok(())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Sequence(_) => "array",
            Self::Mapping(_) => "object",
            Self::Context(_) => "context value",
        }
    }
}

impl Default for ConfigValue {
    /// An empty mapping, the identity for filter configuration.
    fn default() -> Self {
        Self::empty_mapping()
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        Self::from_json(&value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "{self:?}"),
        }
    }
}

/// Rebuild an object graph with every placeholder replaced by its context
/// value.
///
/// Mappings and sequences are rebuilt container by container; primitive
/// leaves pass through unchanged. A placeholder path must produce exactly
/// one match against the snapshot: zero or many matches is a hard error
/// naming the path.
pub fn replace_context_values(
    value: &ConfigValue,
    snapshot: &Value,
) -> Result<ConfigValue, ContextValueError> {
    match value {
        ConfigValue::Context(path) => {
            Ok(ConfigValue::from_json(&resolve_context_path(path, snapshot)?))
        }
        ConfigValue::Sequence(items) => items
            .iter()
            .map(|item| replace_context_values(item, snapshot))
            .collect::<Result<Vec<_>, _>>()
            .map(ConfigValue::Sequence),
        ConfigValue::Mapping(map) => map
            .iter()
            .map(|(k, v)| replace_context_values(v, snapshot).map(|v| (k.clone(), v)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(ConfigValue::Mapping),
        leaf => Ok(leaf.clone()),
    }
}

/// Evaluate a context path against the snapshot, requiring exactly one match.
fn resolve_context_path(path: &str, snapshot: &Value) -> Result<Value, ContextValueError> {
    let mut matches =
        jsonpath::query(snapshot, path).map_err(|e| ContextValueError::InvalidPath {
            path: path.to_string(),
            message: e.to_string(),
        })?;

    match matches.len() {
        0 => Err(ContextValueError::NoMatch(path.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(ContextValueError::MultipleValues(path.to_string())),
    }
}

/// JSON type name used in diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
