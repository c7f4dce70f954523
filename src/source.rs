//! Sources: a storage bound to a format, plus per-run query caching.
//!
//! A [`Source`] accumulates the set of keys the template will need (the
//! *pending set*, filled during the prepare pass), then performs exactly one
//! batched query against its format when asked. Results are cached for O(1)
//! lookup during the replace pass. A source whose pending set is empty never
//! opens its file at all.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{LazyLock, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use crate::context::Context;
use crate::error::{ContextValueError, MetadataMapperError, SourceProviderError};
use crate::format::{Format, format_from_config};
use crate::key::Key;
use crate::storage::{Storage, storage_from_config};

/// The full set of sources available to one resolution run, keyed by name.
pub type SourceMap = HashMap<String, Box<dyn Source>>;

/// A queryable metadata source with per-run key caching.
///
/// Lifecycle: constructed by a provider, mutated by [`Source::add_key`]
/// during the prepare pass, queried exactly once by
/// [`Source::query_all_values`], then read-only via [`Source::get_value`].
pub trait Source: fmt::Debug + Send {
    /// Register a key to be fetched by the batched query. Idempotent:
    /// logically equal keys collapse to one entry.
    fn add_key(&mut self, key: Key);

    /// Execute the single batched query for every pending key. No-op when
    /// the pending set is empty.
    fn query_all_values(&mut self, context: &Context) -> Result<(), MetadataMapperError>;

    /// Look up a previously queried key.
    fn get_value(&self, key: &Key) -> Result<Value, MetadataMapperError>;

    /// Resolve deferred context-value placeholders in this source's
    /// configuration (including its storage and format).
    fn resolve_context_values(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        let _ = snapshot;
        Ok(())
    }

    /// Clone into a fresh boxed instance.
    fn clone_source(&self) -> Box<dyn Source>;
}

impl Clone for Box<dyn Source> {
    fn clone(&self) -> Self {
        self.clone_source()
    }
}

/// The standard source: one [`Storage`] plus one [`Format`].
#[derive(Debug, Clone)]
pub struct FileSource {
    storage: Box<dyn Storage>,
    format: Box<dyn Format>,
    keys: HashSet<Key>,
    values: HashMap<Key, Value>,
}

impl FileSource {
    pub fn new(storage: Box<dyn Storage>, format: Box<dyn Format>) -> Self {
        Self {
            storage,
            format,
            keys: HashSet::new(),
            values: HashMap::new(),
        }
    }

    fn from_config(args: &Map<String, Value>) -> Result<Box<dyn Source>, SourceProviderError> {
        crate::provider::check_fields(args, &["storage", "format"])?;

        let storage = require_object(args, "storage")?;
        let format = require_object(args, "format")?;

        Ok(Box::new(Self::new(
            storage_from_config(storage)?,
            format_from_config(format)?,
        )))
    }
}

fn require_object<'a>(
    args: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Map<String, Value>, SourceProviderError> {
    let value = args
        .get(name)
        .ok_or_else(|| SourceProviderError::MissingArgument(name.to_string()))?;
    value
        .as_object()
        .ok_or_else(|| SourceProviderError::InvalidArgument {
            name: name.to_string(),
            reason: format!(
                "must be an object, got {}",
                crate::value::json_type_name(value)
            ),
        })
}

impl Source for FileSource {
    fn add_key(&mut self, key: Key) {
        self.keys.insert(key);
    }

    fn query_all_values(&mut self, context: &Context) -> Result<(), MetadataMapperError> {
        if self.keys.is_empty() {
            return Ok(());
        }

        let keys: Vec<Key> = self.keys.iter().cloned().collect();
        // Scoped acquisition: the stream drops on every exit path,
        // including a parse failure inside the format.
        let mut stream = self.storage.open_file(context)?;
        let new_values = self.format.get_values(stream.as_mut(), &keys)?;
        debug!(key_count = keys.len(), "queried source");
        self.values.extend(new_values);
        Ok(())
    }

    fn get_value(&self, key: &Key) -> Result<Value, MetadataMapperError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| MetadataMapperError::KeyNotQueried(key.key().to_string()))
    }

    fn resolve_context_values(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        self.storage.resolve_context_values(snapshot)?;
        self.format.resolve_context_values(snapshot)
    }

    fn clone_source(&self) -> Box<dyn Source> {
        Box::new(self.clone())
    }
}

/// Factory signature for registered source kinds.
pub type SourceFactory =
    fn(&Map<String, Value>) -> Result<Box<dyn Source>, SourceProviderError>;

static SOURCE_REGISTRY: LazyLock<RwLock<HashMap<String, SourceFactory>>> = LazyLock::new(|| {
    let mut registry: HashMap<String, SourceFactory> = HashMap::new();
    registry.insert("FileSource".to_string(), FileSource::from_config);
    RwLock::new(registry)
});

/// Register a source kind under a configuration tag.
pub fn register_source_kind(tag: impl Into<String>, factory: SourceFactory) {
    SOURCE_REGISTRY
        .write()
        .expect("source registry poisoned")
        .insert(tag.into(), factory);
}

/// Build a source from its untyped configuration. A missing `class` tag
/// selects the plain file-backed source kind.
pub fn source_from_config(
    config: &Map<String, Value>,
) -> Result<Box<dyn Source>, SourceProviderError> {
    let class = match config.get("class") {
        None => "FileSource",
        Some(value) => value
            .as_str()
            .ok_or_else(|| SourceProviderError::InvalidArgument {
                name: "class".to_string(),
                reason: format!(
                    "must be a string, got {}",
                    crate::value::json_type_name(value)
                ),
            })?,
    };

    let factory = {
        let registry = SOURCE_REGISTRY.read().expect("source registry poisoned");
        registry
            .get(class)
            .copied()
            .ok_or_else(|| SourceProviderError::InvalidSourceKind(class.to_string()))?
    };

    let mut args = config.clone();
    args.remove("class");
    factory(&args)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::format::Json;
    use crate::storage::Dummy;

    fn json_source(payload: &str) -> FileSource {
        FileSource::new(Box::new(Dummy::new(payload)), Box::new(Json))
    }

    #[test]
    fn test_query_and_lookup() {
        let mut source = json_source(r#"{"a": {"b": 42}, "c": "x"}"#);
        source.add_key(Key::new("a.b"));
        source.add_key(Key::new("c"));
        source.query_all_values(&Context::new()).unwrap();

        assert_eq!(source.get_value(&Key::new("a.b")).unwrap(), json!(42));
        assert_eq!(source.get_value(&Key::new("c")).unwrap(), json!("x"));
    }

    #[test]
    fn test_get_value_before_query_is_an_error() {
        let mut source = json_source("{}");
        source.add_key(Key::new("a"));

        let err = source.get_value(&Key::new("a")).unwrap_err();
        assert!(matches!(err, MetadataMapperError::KeyNotQueried(_)));
    }

    #[test]
    fn test_get_value_for_unregistered_key_is_an_error() {
        let mut source = json_source(r#"{"a": 1}"#);
        source.add_key(Key::new("a"));
        source.query_all_values(&Context::new()).unwrap();

        let err = source.get_value(&Key::new("b")).unwrap_err();
        assert!(matches!(err, MetadataMapperError::KeyNotQueried(_)));
    }

    #[test]
    fn test_empty_pending_set_skips_the_file_entirely() {
        // An unparseable payload proves the file was never opened.
        let mut source = json_source("definitely not json");
        source.query_all_values(&Context::new()).unwrap();
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        let mut source = json_source(r#"{"a": 1}"#);
        source.add_key(Key::new("a"));
        source.add_key(Key::new("a"));
        source.query_all_values(&Context::new()).unwrap();
        assert_eq!(source.get_value(&Key::new("a")).unwrap(), json!(1));
    }

    #[test]
    fn test_source_from_config_default_class() {
        let config = json!({
            "storage": {"class": "Dummy", "data": "{\"a\": 1}"},
            "format": {"class": "Json"},
        });
        let mut source = source_from_config(config.as_object().unwrap()).unwrap();
        source.add_key(Key::new("a"));
        source.query_all_values(&Context::new()).unwrap();
        assert_eq!(source.get_value(&Key::new("a")).unwrap(), json!(1));
    }

    #[test]
    fn test_source_from_config_unknown_class() {
        let config = json!({"class": "NotARealSource"});
        let err = source_from_config(config.as_object().unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "invalid source type 'NotARealSource'");
    }

    #[test]
    fn test_source_from_config_missing_storage() {
        let config = json!({"format": {"class": "Json"}});
        let err = source_from_config(config.as_object().unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "missing required argument 'storage'");
    }
}
