//! Attribute filter matching.
//!
//! Storages select a file descriptor from the context and the archive-member
//! format selects a member from an archive directory using the same rule: a
//! candidate matches when every filter entry matches the corresponding
//! attribute. String filter values are regular expressions matched against
//! the whole attribute value; any other filter value must compare equal.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::value::ConfigValue;

/// A filter set failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filters must be an object, got {0}")]
    NotAMapping(&'static str),

    #[error("filters contain an unresolved context value")]
    UnresolvedContextValue,

    #[error("invalid filter pattern for '{name}': {message}")]
    InvalidPattern { name: String, message: String },
}

enum Pattern {
    /// Full-match regular expression, used for string filter values.
    Regex(regex::Regex),
    /// Exact equality, used for every other filter value.
    Exact(Value),
}

/// A compiled filter set, ready to match candidate attribute mappings.
pub struct CompiledFilters {
    patterns: Vec<(String, Pattern)>,
    display: String,
}

impl CompiledFilters {
    /// Compile a (context-resolved) filter mapping.
    pub fn compile(filters: &ConfigValue) -> Result<Self, FilterError> {
        let mapping = match filters {
            ConfigValue::Mapping(map) => map,
            ConfigValue::Context(_) => return Err(FilterError::UnresolvedContextValue),
            other => return Err(FilterError::NotAMapping(other.type_name())),
        };

        let mut patterns = Vec::with_capacity(mapping.len());
        for (name, value) in mapping {
            let value = value
                .to_json()
                .ok_or(FilterError::UnresolvedContextValue)?;
            let pattern = match &value {
                Value::String(s) => {
                    // Anchor so the expression must match the whole value.
                    let regex = regex::Regex::new(&format!("^(?:{s})$")).map_err(|e| {
                        FilterError::InvalidPattern {
                            name: name.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    Pattern::Regex(regex)
                }
                other => Pattern::Exact(other.clone()),
            };
            patterns.push((name.clone(), pattern));
        }

        Ok(Self {
            patterns,
            display: filters.to_string(),
        })
    }

    /// True when every filter entry matches the candidate's attributes.
    ///
    /// A candidate missing a filtered attribute does not match. A string
    /// pattern only matches string attribute values.
    pub fn matches(&self, attrs: &Map<String, Value>) -> bool {
        self.patterns.iter().all(|(name, pattern)| {
            let Some(value) = attrs.get(name) else {
                return false;
            };
            match pattern {
                Pattern::Regex(regex) => value.as_str().is_some_and(|s| regex.is_match(s)),
                Pattern::Exact(expected) => value == expected,
            }
        })
    }

    /// The original filter mapping, for diagnostics.
    pub fn display(&self) -> &str {
        &self.display
    }
}
