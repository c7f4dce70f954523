//! File location and byte-stream access.
//!
//! A [`Storage`] locates exactly one file for the current
//! [`Context`](crate::Context) and opens a byte stream to it. Most storages
//! are *filtered*: they select a file descriptor from `context.files` whose
//! attributes match every configured filter (see [`crate::filters`]), then
//! open that descriptor. [`Dummy`] bypasses filtering entirely and serves a
//! hardcoded payload, which makes it useful as a test double.
//!
//! Storage kinds are registered in a process-wide registry keyed by their
//! configuration tag; [`crate::provider::ConfigSourceProvider`] dispatches
//! `{"class": "LocalFile", ...}` configurations through it.

mod http;
#[cfg(feature = "s3")]
mod s3_file;

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::sync::{LazyLock, RwLock};

use serde_json::{Map, Value};
use tracing::trace;

pub use http::{CmrQuery, HttpRequest};
#[cfg(feature = "s3")]
pub use s3_file::S3File;

use crate::context::Context;
use crate::error::{SourceProviderError, StorageError};
use crate::filters::{CompiledFilters, FilterError};
use crate::value::ConfigValue;

/// A byte stream handed from a [`Storage`] to a
/// [`Format`](crate::format::Format).
///
/// Formats that read archives need random access, so seekability is part of
/// the contract; every storage buffers or serves seekable data.
pub trait ByteStream: Read + Seek {}

impl<T: Read + Seek> ByteStream for T {}

/// Locates one file for a context and opens a byte stream to it.
///
/// The stream is a scoped acquisition: dropping it releases the underlying
/// resource on every exit path.
pub trait Storage: fmt::Debug + Send {
    /// Open the file this storage addresses for the given context.
    fn open_file(&self, context: &Context) -> Result<Box<dyn ByteStream>, StorageError>;

    /// Resolve deferred context-value placeholders in this storage's
    /// configuration. Called once per run, before any file is opened.
    fn resolve_context_values(
        &mut self,
        snapshot: &Value,
    ) -> Result<(), crate::error::ContextValueError> {
        let _ = snapshot;
        Ok(())
    }

    /// Clone into a fresh boxed instance.
    fn clone_box(&self) -> Box<dyn Storage>;
}

impl Clone for Box<dyn Storage> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Factory signature for registered storage kinds. Receives the storage
/// configuration mapping with the `class` tag already removed.
pub type StorageFactory =
    fn(&Map<String, Value>) -> Result<Box<dyn Storage>, SourceProviderError>;

static STORAGE_REGISTRY: LazyLock<RwLock<HashMap<String, StorageFactory>>> =
    LazyLock::new(|| {
        let mut registry: HashMap<String, StorageFactory> = HashMap::new();
        registry.insert("LocalFile".to_string(), LocalFile::from_config);
        registry.insert("Dummy".to_string(), Dummy::from_config);
        registry.insert("HttpRequest".to_string(), HttpRequest::from_config);
        registry.insert("CmrQuery".to_string(), CmrQuery::from_config);
        #[cfg(feature = "s3")]
        registry.insert("S3File".to_string(), S3File::from_config);
        RwLock::new(registry)
    });

/// Register a storage kind under a configuration tag.
///
/// Built-in kinds are seeded at first registry use; registration is
/// append-only for the life of the process.
pub fn register_storage_kind(tag: impl Into<String>, factory: StorageFactory) {
    STORAGE_REGISTRY
        .write()
        .expect("storage registry poisoned")
        .insert(tag.into(), factory);
}

/// Build a storage from its untyped configuration by `class` tag dispatch.
pub fn storage_from_config(
    config: &Map<String, Value>,
) -> Result<Box<dyn Storage>, SourceProviderError> {
    let class = config
        .get("class")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceProviderError::MissingArgument("class".to_string()))?;

    let factory = {
        let registry = STORAGE_REGISTRY.read().expect("storage registry poisoned");
        registry
            .get(class)
            .copied()
            .ok_or_else(|| SourceProviderError::InvalidStorageKind(class.to_string()))?
    };

    let mut args = config.clone();
    args.remove("class");
    factory(&args)
}

/// Select the file descriptor from the context that matches `filters`.
///
/// Fails distinctly when the context has no files at all versus when files
/// exist but none match, so an empty-context misconfiguration stays
/// diagnosable. The first matching descriptor wins.
pub(crate) fn select_file<'c>(
    context: &'c Context,
    filters: &ConfigValue,
) -> Result<&'c Map<String, Value>, StorageError> {
    let compiled = CompiledFilters::compile(filters).map_err(filter_error)?;

    if context.files.is_empty() {
        return Err(StorageError::NoFilesInContext);
    }

    context
        .files
        .iter()
        .find(|info| {
            let matched = compiled.matches(info);
            trace!(matched, ?info, "filter check");
            matched
        })
        .ok_or_else(|| StorageError::NoMatchingFiles(compiled.display().to_string()))
}

fn filter_error(err: FilterError) -> StorageError {
    StorageError::InvalidParameter {
        name: "filters",
        reason: err.to_string(),
    }
}

fn require_str_attr<'a>(
    info: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, StorageError> {
    info.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::MissingAttribute(name.to_string()))
}

/// A storage which reads a matching context file from the local filesystem.
///
/// The matched descriptor must carry a `path` attribute.
#[derive(Debug, Clone, Default)]
pub struct LocalFile {
    filters: ConfigValue,
}

impl LocalFile {
    pub fn new(filters: impl Into<ConfigValue>) -> Self {
        Self {
            filters: filters.into(),
        }
    }

    fn from_config(args: &Map<String, Value>) -> Result<Box<dyn Storage>, SourceProviderError> {
        crate::provider::check_fields(args, &["filters"])?;
        let filters = args
            .get("filters")
            .map(ConfigValue::from_config)
            .unwrap_or_else(ConfigValue::empty_mapping);
        Ok(Box::new(Self { filters }))
    }
}

impl Storage for LocalFile {
    fn open_file(&self, context: &Context) -> Result<Box<dyn ByteStream>, StorageError> {
        let info = select_file(context, &self.filters)?;
        let path = require_str_attr(info, "path")?;
        Ok(Box::new(File::open(path)?))
    }

    fn resolve_context_values(
        &mut self,
        snapshot: &Value,
    ) -> Result<(), crate::error::ContextValueError> {
        self.filters.resolve(snapshot)
    }

    fn clone_box(&self) -> Box<dyn Storage> {
        Box::new(self.clone())
    }
}

/// A storage that returns a hardcoded byte payload, bypassing filtering.
///
/// Used for testing and for templates whose data is embedded in the
/// configuration itself.
#[derive(Debug, Clone, Default)]
pub struct Dummy {
    data: Vec<u8>,
}

impl Dummy {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    fn from_config(args: &Map<String, Value>) -> Result<Box<dyn Storage>, SourceProviderError> {
        crate::provider::check_fields(args, &["data"])?;
        let data = args
            .get("data")
            .ok_or_else(|| SourceProviderError::MissingArgument("data".to_string()))?;
        // Sentinel rules still apply ($$ unwraps), but a hardcoded payload
        // cannot be deferred to the context.
        match ConfigValue::from_config(data) {
            ConfigValue::String(s) => Ok(Box::new(Self::new(s.into_bytes()))),
            ConfigValue::Context(_) => Err(SourceProviderError::InvalidArgument {
                name: "data".to_string(),
                reason: "does not support context values".to_string(),
            }),
            other => Err(SourceProviderError::InvalidArgument {
                name: "data".to_string(),
                reason: format!("must be a string, got {}", other.type_name()),
            }),
        }
    }
}

impl Storage for Dummy {
    fn open_file(&self, _context: &Context) -> Result<Box<dyn ByteStream>, StorageError> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    fn clone_box(&self) -> Box<dyn Storage> {
        Box::new(self.clone())
    }
}
