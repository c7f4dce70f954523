//! Error types for the metadata mapper.
//!
//! The taxonomy mirrors the engine's layering: each layer raises the most
//! specific kind it can, and each orchestration boundary (context
//! substitution, the prepare pass, the query pass, the replace pass, provider
//! construction) re-wraps with its phase context. [`TemplateError`] already
//! carries a debug path pinpointing the offending template node, so it passes
//! through those boundaries unwrapped.
//!
//! All failures are surfaced as `Result` errors; a single failure anywhere
//! aborts the entire resolution run. There is no retry and no partial-result
//! mode.

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = MetadataMapperError> = std::result::Result<T, E>;

/// Top-level error raised by [`MetadataMapper`](crate::MetadataMapper).
///
/// The phase-wrapping variants (`CacheKeys`, `ContextSubstitution`,
/// `QuerySource`, `EvaluateTemplate`, `CallDirective`) record *which* stage
/// of a resolution run failed; the transparent variants forward the specific
/// error kinds raised by lower layers.
#[derive(Debug, Error)]
pub enum MetadataMapperError {
    /// The prepare pass failed while registering keys with their sources.
    #[error("failed to cache source keys: {0}")]
    CacheKeys(#[source] Box<MetadataMapperError>),

    /// Context-value substitution failed for one source's configuration.
    #[error("failed to process context values for source '{name}': {source}")]
    ContextSubstitution {
        name: String,
        #[source]
        source: ContextValueError,
    },

    /// A source's single batched query failed.
    #[error("failed to query source '{name}': {source}")]
    QuerySource {
        name: String,
        #[source]
        source: Box<MetadataMapperError>,
    },

    /// The replace pass failed while rebuilding the template.
    #[error("failed to evaluate template: {0}")]
    EvaluateTemplate(#[source] Box<MetadataMapperError>),

    /// A directive's `call` failed after construction succeeded.
    #[error("failed to call directive at {debug_path}: {source}")]
    CallDirective {
        debug_path: String,
        #[source]
        source: Box<MetadataMapperError>,
    },

    /// A directive referenced a source name that was never provided.
    #[error("source '{0}' does not exist")]
    NoSuchSource(String),

    /// A directive referenced a format kind that is not registered.
    #[error("format '{0}' does not exist")]
    NoSuchFormat(String),

    /// `get_value` was called for a key that was never added and queried.
    ///
    /// This is an ordering bug in the caller: either the prepare pass was
    /// skipped or the key was never registered with the source.
    #[error("key '{0}' was never queried (was prepare skipped?)")]
    KeyNotQueried(String),

    /// Directive-level parameter validation failure.
    #[error("{0}")]
    Directive(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    ContextValue(#[from] ContextValueError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    SourceProvider(#[from] SourceProviderError),
}

/// An error that occurred while processing the metadata template.
///
/// Carries an optional debug path: a `$`-rooted breadcrumb (`$.attr[3].@op`)
/// matching the offending node's position in the original template.
#[derive(Debug, Clone)]
pub struct TemplateError {
    pub message: String,
    pub debug_path: Option<String>,
}

impl TemplateError {
    pub fn new(message: impl Into<String>, debug_path: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            debug_path: Some(debug_path.into()),
        }
    }

    pub fn without_path(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            debug_path: None,
        }
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.debug_path {
            Some(path) => write!(f, "failed to process template at {path}: {}", self.message),
            None => write!(f, "failed to process template: {}", self.message),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Invalid [`Key`](crate::Key) construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("return_list and return_first are mutually exclusive")]
    ConflictingOptions,

    #[error("unexpected key option '{0}'")]
    UnexpectedOption(String),

    #[error("key option '{name}' {reason}")]
    InvalidOption { name: String, reason: String },
}

/// Failure to resolve a context-value placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextValueError {
    #[error("no values found for context path '{0}'")]
    NoMatch(String),

    #[error("context path '{0}' returned more than one value")]
    MultipleValues(String),

    #[error("invalid context path '{path}': {message}")]
    InvalidPath { path: String, message: String },
}

/// A Format-level miss or parse failure.
#[derive(Debug, Error)]
pub enum FormatError {
    /// A key produced zero matches and had no default.
    #[error("key not found '{0}'")]
    KeyNotFound(String),

    /// Any other evaluation failure, prefixed with the offending key path.
    #[error("'{key}': {message}")]
    Key { key: String, message: String },

    /// The document could not be parsed at all.
    #[error("failed to parse data: {0}")]
    Parse(String),

    /// The archive contains no members at all.
    ///
    /// Raised before filter matching so an empty archive is diagnosable
    /// separately from filters that match nothing.
    #[error("no members in archive")]
    EmptyArchive,

    /// The archive-member filter set itself is unusable.
    #[error("invalid member filters: {0}")]
    InvalidFilters(String),

    #[error("no archive members matched filters {0}")]
    NoMatchingMembers(String),

    #[error("multiple archive members matched filters {0}")]
    MultipleMatchingMembers(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure to locate or open a file behind a [`Storage`](crate::storage::Storage).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The context has no files at all.
    ///
    /// Distinct from [`StorageError::NoMatchingFiles`] so that an empty
    /// context misconfiguration is diagnosable.
    #[error("no files in context")]
    NoFilesInContext,

    #[error("no files matched filters {0}")]
    NoMatchingFiles(String),

    /// The matched file descriptor lacks an attribute the storage needs.
    #[error("file descriptor is missing attribute '{0}'")]
    MissingAttribute(String),

    /// A storage parameter resolved to an unusable value.
    #[error("storage parameter '{name}' {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "s3")]
    #[error("object storage error: {0}")]
    S3(String),
}

/// Failure to build the Source graph from untyped configuration.
#[derive(Debug, Error)]
pub enum SourceProviderError {
    #[error("invalid source type '{0}'")]
    InvalidSourceKind(String),

    #[error("invalid storage type '{0}'")]
    InvalidStorageKind(String),

    #[error("invalid format type '{0}'")]
    InvalidFormatKind(String),

    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    /// Unknown arguments are rejected rather than silently dropped.
    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error("argument '{name}' {reason}")]
    InvalidArgument { name: String, reason: String },

    /// Wrapper naming the source whose configuration failed.
    #[error("failed to create source '{name}': {source}")]
    CreateSource {
        name: String,
        #[source]
        source: Box<SourceProviderError>,
    },
}

impl SourceProviderError {
    /// Wrap a construction failure with the offending source key.
    pub(crate) fn for_source(self, name: &str) -> Self {
        Self::CreateSource {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}
