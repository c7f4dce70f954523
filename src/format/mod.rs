//! Document parsing and point queries.
//!
//! A [`Format`] parses a byte stream once into an in-memory structure and
//! answers one or many [`Key`] queries against it. The batched
//! [`Format::get_values`] call exists so a format that must parse an entire
//! document (an XML tree, an HDF5 file) does so a single time no matter how
//! many keys the template asks for.
//!
//! Most formats implement the lower-level [`FileFormat`] pair
//! (`parse_data` + `eval_key`) and receive the batching, default
//! substitution and error wrapping for free. Delegating formats like
//! [`ZipMember`] implement [`Format`] directly.

mod archive;
#[cfg(feature = "h5")]
mod h5;
#[cfg(feature = "xml")]
mod xml;

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::{LazyLock, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

pub use archive::{ZipInfo, ZipMember};
#[cfg(feature = "h5")]
pub use h5::H5;
#[cfg(feature = "xml")]
pub use xml::Xml;

use crate::error::{ContextValueError, FormatError, SourceProviderError};
use crate::jsonpath;
use crate::key::{Key, KeyMatchError};
use crate::storage::ByteStream;

/// A parser plus point-query engine for one document shape.
pub trait Format: fmt::Debug + Send {
    /// Parse the stream once and evaluate every key against it.
    ///
    /// Keys with a default have it substituted on a miss; any other miss or
    /// evaluation failure aborts the whole batch.
    fn get_values(
        &self,
        stream: &mut dyn ByteStream,
        keys: &[Key],
    ) -> Result<HashMap<Key, Value>, FormatError>;

    /// Single-key convenience form of [`Format::get_values`].
    fn get_value(&self, stream: &mut dyn ByteStream, key: &Key) -> Result<Value, FormatError>;

    /// Resolve deferred context-value placeholders in this format's
    /// configuration.
    fn resolve_context_values(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        let _ = snapshot;
        Ok(())
    }

    /// Clone into a fresh boxed instance.
    fn clone_box(&self) -> Box<dyn Format>;
}

impl Clone for Box<dyn Format> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Key evaluation failure inside a [`FileFormat`].
///
/// `NotFound` is special: the wrapper substitutes the key's default before
/// converting it into a [`FormatError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("key not found")]
    NotFound,

    #[error("{0}")]
    Message(String),
}

impl From<KeyMatchError> for EvalError {
    fn from(err: KeyMatchError) -> Self {
        match err {
            KeyMatchError::NotFound => Self::NotFound,
            other => Self::Message(other.to_string()),
        }
    }
}

/// A format for plain data files: parse once, evaluate keys against the
/// parsed structure.
///
/// Implementors get a [`Format`] implementation for free via the blanket
/// impl, which handles batching, scoped parsing, default substitution and
/// error wrapping uniformly.
pub trait FileFormat: fmt::Debug + Clone + Send + 'static {
    /// The parsed, queryable structure. Dropped when the batch completes.
    type Data;

    /// Parse the byte stream into a queryable structure.
    fn parse_data(&self, stream: &mut dyn ByteStream) -> Result<Self::Data, FormatError>;

    /// Query the parsed structure for one key.
    fn eval_key(&self, data: &Self::Data, key: &Key) -> Result<Value, EvalError>;
}

impl<T: FileFormat> Format for T {
    fn get_values(
        &self,
        stream: &mut dyn ByteStream,
        keys: &[Key],
    ) -> Result<HashMap<Key, Value>, FormatError> {
        let data = self.parse_data(stream)?;
        keys.iter()
            .map(|key| eval_key_wrapper(self, &data, key).map(|value| (key.clone(), value)))
            .collect()
    }

    fn get_value(&self, stream: &mut dyn ByteStream, key: &Key) -> Result<Value, FormatError> {
        let data = self.parse_data(stream)?;
        eval_key_wrapper(self, &data, key)
    }

    fn clone_box(&self) -> Box<dyn Format> {
        Box::new(self.clone())
    }
}

/// Evaluate one key, substituting the key's default on a miss and wrapping
/// any other failure with the key's path for diagnostics.
fn eval_key_wrapper<T: FileFormat>(
    format: &T,
    data: &T::Data,
    key: &Key,
) -> Result<Value, FormatError> {
    match format.eval_key(data, key) {
        Ok(value) => {
            trace!(key = key.key(), "evaluated key");
            Ok(value)
        }
        Err(EvalError::NotFound) => match key.default() {
            Some(default) => Ok(default.clone()),
            None => Err(FormatError::KeyNotFound(key.key().to_string())),
        },
        Err(EvalError::Message(message)) => Err(FormatError::Key {
            key: key.key().to_string(),
            message,
        }),
    }
}

/// Factory signature for registered format kinds. Receives the format
/// configuration mapping with the `class` tag already removed.
pub type FormatFactory =
    fn(&Map<String, Value>) -> Result<Box<dyn Format>, SourceProviderError>;

static FORMAT_REGISTRY: LazyLock<RwLock<HashMap<String, FormatFactory>>> = LazyLock::new(|| {
    let mut registry: HashMap<String, FormatFactory> = HashMap::new();
    registry.insert("Json".to_string(), Json::from_config);
    registry.insert("ZipMember".to_string(), archive::zip_member_from_config);
    registry.insert("ZipInfo".to_string(), archive::zip_info_from_config);
    #[cfg(feature = "xml")]
    registry.insert("Xml".to_string(), xml::xml_from_config);
    #[cfg(feature = "h5")]
    registry.insert("H5".to_string(), h5::h5_from_config);
    RwLock::new(registry)
});

/// Register a format kind under a configuration tag.
pub fn register_format_kind(tag: impl Into<String>, factory: FormatFactory) {
    FORMAT_REGISTRY
        .write()
        .expect("format registry poisoned")
        .insert(tag.into(), factory);
}

/// Build a format from its untyped configuration by `class` tag dispatch.
pub fn format_from_config(
    config: &Map<String, Value>,
) -> Result<Box<dyn Format>, SourceProviderError> {
    let class = config
        .get("class")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceProviderError::MissingArgument("class".to_string()))?;

    let mut args = config.clone();
    args.remove("class");
    format_from_tag(class)?(&args)
}

/// Look up a registered format kind by tag, e.g. for the `reformatted`
/// directive, which constructs formats with no configuration.
pub fn format_from_tag(tag: &str) -> Result<FormatFactory, SourceProviderError> {
    let registry = FORMAT_REGISTRY.read().expect("format registry poisoned");
    registry
        .get(tag)
        .copied()
        .ok_or_else(|| SourceProviderError::InvalidFormatKind(tag.to_string()))
}

/// A format for querying JSON documents.
///
/// With the `jsonpath` feature, keys are full JSONPath expressions
/// (`$.inventory[?@.name == 'Banana'].price`); without it, only the
/// restricted dot/bracket syntax is supported. Bare keys like `nested.key`
/// are rooted automatically.
#[derive(Debug, Clone, Default)]
pub struct Json;

impl Json {
    fn from_config(args: &Map<String, Value>) -> Result<Box<dyn Format>, SourceProviderError> {
        crate::provider::check_fields(args, &[])?;
        Ok(Box::new(Self))
    }
}

impl FileFormat for Json {
    type Data = Value;

    fn parse_data(&self, stream: &mut dyn ByteStream) -> Result<Self::Data, FormatError> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        serde_json::from_slice(&bytes).map_err(|e| FormatError::Parse(e.to_string()))
    }

    fn eval_key(&self, data: &Self::Data, key: &Key) -> Result<Value, EvalError> {
        let values = jsonpath::query(data, key.key())
            .map_err(|e| EvalError::Message(e.to_string()))?;
        Ok(key.resolve_list_match(values)?)
    }
}
