//! metamap - Declarative metadata template resolution
//!
//! This crate resolves a declarative **template** (a JSON-shaped structure of
//! constants and *directives*) into a concrete metadata record by pulling
//! values out of a heterogeneous set of artifacts: local files, object
//! storage, HTTP responses, archive members. Three small abstractions make
//! the artifact set pluggable:
//!
//! - [`storage::Storage`] locates one file for the run and opens a byte
//!   stream to it,
//! - [`format::Format`] parses the stream once and answers point queries,
//! - [`source::Source`] binds a storage to a format and caches the queries
//!   made against it, so each artifact is parsed at most once per run no
//!   matter how many values the template extracts from it.
//!
//! A [`Context`] carries the run's inputs (an ordered file-descriptor list
//! plus free-form metadata) through every layer.
//!
//! # Example
//!
//! ```
//! use metamap::{Context, MetadataMapper, ConfigSourceProvider};
//! use serde_json::json;
//!
//! let provider = ConfigSourceProvider::from_value(json!({
//!     "granule": {
//!         "storage": {"class": "Dummy", "data": "{\"a\": {\"b\": 42}}"},
//!         "format": {"class": "Json"},
//!     },
//! }));
//!
//! let mapper = MetadataMapper::new(json!({
//!     "foo": {"@mapped": {"source": "granule", "key": "a.b"}},
//! }))
//! .with_source_provider(provider);
//!
//! let record = mapper.get_metadata(&Context::new()).unwrap();
//! assert_eq!(record, json!({"foo": 42}));
//! ```
//!
//! # Extensibility
//!
//! Source, storage, format and directive kinds live in process-wide
//! registries seeded with the built-in kinds; downstream crates add their
//! own with [`source::register_source_kind`],
//! [`storage::register_storage_kind`], [`format::register_format_kind`] and
//! [`directive::register_directive`]. Configuration dispatches by `class`
//! tag against those registries, and string values beginning with `$` defer
//! to the run's context (a literal `$` is written `$$`).
//!
//! # Features
//!
//! - `jsonpath` *(default)*: RFC 9535 JSONPath keys for JSON-shaped
//!   documents; without it a restricted dot/bracket engine is used.
//! - `xml` *(default)*: XPath 1.0 queries over XML documents.
//! - `h5`: HDF5 datasets and attributes (requires libhdf5).
//! - `s3`: object-storage file access.

pub mod builder;
pub mod context;
pub mod directive;
pub mod error;
pub mod filters;
pub mod format;
pub mod jsonpath;
pub mod key;
pub mod mapper;
pub mod provider;
pub mod source;
pub mod storage;
pub mod value;

pub use context::Context;
pub use error::{
    ContextValueError, FormatError, KeyError, MetadataMapperError, Result, SourceProviderError,
    StorageError, TemplateError,
};
pub use key::Key;
pub use mapper::MetadataMapper;
pub use provider::{ConfigSourceProvider, SourceProvider, StaticSourceProvider};
pub use source::{FileSource, Source};
pub use value::ConfigValue;
