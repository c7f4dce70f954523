//! Query descriptors and cardinality resolution.
//!
//! A [`Key`] pairs an opaque path string with a cardinality policy and an
//! optional default. The path syntax is owned by the
//! [`Format`](crate::format::Format) that evaluates it: JSONPath for JSON
//! documents, XPath for XML, a slash path with an optional attribute suffix
//! for HDF5. Keys compare and hash by value so that two logically identical
//! queries made from different template locations collapse to a single cache
//! entry and a single evaluation.

use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::KeyError;

/// A (path, cardinality policy, default) query descriptor.
///
/// Constructed through [`Key::new`] or [`Key::from_options`]; the
/// `return_list` and `return_first` policies are mutually exclusive and
/// violating that is a configuration error at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    key: String,
    return_list: bool,
    return_first: bool,
    default: Option<Value>,
}

/// Outcome of applying a key's cardinality policy to a match sequence.
///
/// The Format layer maps `NotFound` to the key's default (when one is set)
/// before converting to a [`FormatError`](crate::error::FormatError).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyMatchError {
    #[error("key not found")]
    NotFound,

    #[error("returned multiple values (try setting return_list=true)")]
    MultipleValues,
}

impl Key {
    /// Create a key with the default cardinality policy (exactly one match).
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            return_list: false,
            return_first: false,
            default: None,
        }
    }

    /// Return all matches as a list. Never fails, even on zero matches.
    pub fn with_return_list(mut self) -> Result<Self, KeyError> {
        if self.return_first {
            return Err(KeyError::ConflictingOptions);
        }
        self.return_list = true;
        Ok(self)
    }

    /// Return the first match, ignoring extras.
    pub fn with_return_first(mut self) -> Result<Self, KeyError> {
        if self.return_list {
            return Err(KeyError::ConflictingOptions);
        }
        self.return_first = true;
        Ok(self)
    }

    /// Substitute this value when the key produces zero matches.
    ///
    /// An explicit `null` default is distinct from no default at all.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Build a key from a path plus an untyped `key_options` mapping, as a
    /// directive receives them from the template.
    ///
    /// Recognized options: `return_list` (bool), `return_first` (bool),
    /// `default` (any value). Unknown options are rejected.
    pub fn from_options(key: impl Into<String>, options: &Map<String, Value>) -> Result<Self, KeyError> {
        let mut built = Self::new(key);

        for (name, value) in options {
            match name.as_str() {
                "return_list" => {
                    built.return_list = expect_bool(name, value)?;
                }
                "return_first" => {
                    built.return_first = expect_bool(name, value)?;
                }
                "default" => {
                    built.default = Some(value.clone());
                }
                _ => return Err(KeyError::UnexpectedOption(name.clone())),
            }
        }

        if built.return_list && built.return_first {
            return Err(KeyError::ConflictingOptions);
        }

        Ok(built)
    }

    /// The opaque path string, interpreted by the evaluating Format.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn return_list(&self) -> bool {
        self.return_list
    }

    pub fn return_first(&self) -> bool {
        self.return_first
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Apply this key's cardinality policy to a sequence of matched values.
    ///
    /// - `return_list`: the sequence is returned verbatim, possibly empty.
    /// - zero matches: [`KeyMatchError::NotFound`].
    /// - `return_first`: the first element.
    /// - otherwise exactly one match is required; more is
    ///   [`KeyMatchError::MultipleValues`].
    ///
    /// The policy is format-agnostic and reused identically by every Format
    /// so that one-vs-many-vs-first-vs-list semantics are uniform across
    /// document shapes.
    pub fn resolve_list_match(&self, values: Vec<Value>) -> Result<Value, KeyMatchError> {
        if self.return_list {
            return Ok(Value::Array(values));
        }

        let mut values = values;
        match values.len() {
            0 => Err(KeyMatchError::NotFound),
            1 => Ok(values.remove(0)),
            _ if self.return_first => Ok(values.remove(0)),
            _ => Err(KeyMatchError::MultipleValues),
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.return_list.hash(state);
        self.return_first.hash(state);
        // serde_json::Value is not Hash; the canonical serialization is a
        // stable stand-in consistent with PartialEq.
        match &self.default {
            Some(value) => value.to_string().hash(state),
            None => state.write_u8(0),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

fn expect_bool(name: &str, value: &Value) -> Result<bool, KeyError> {
    value.as_bool().ok_or_else(|| KeyError::InvalidOption {
        name: name.to_string(),
        reason: format!("must be a boolean, got {}", crate::value::json_type_name(value)),
    })
}
