//! Run-scoped inputs for a resolution run.

use serde::Serialize;
use serde_json::{Map, Value};

/// The inputs to a single resolution run: an ordered list of file
/// descriptors plus free-form metadata.
///
/// File descriptors are open-ended attribute mappings (`name`, `bucket`,
/// `key`, `path`, `type`, ...); storages select from them by filter matching.
/// The engine never mutates a context, it only reads it (and computes
/// directive parameters from it).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Context {
    /// Ordered file descriptors available to this run.
    pub files: Vec<Map<String, Value>>,
    /// Run-scoped metadata (e.g. a workflow execution id).
    pub meta: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(mut self, files: Vec<Map<String, Value>>) -> Self {
        self.files = files;
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Flatten this context into a plain JSON value
    /// (`{"files": [...], "meta": {...}}`) for context-value path lookups.
    pub fn snapshot(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "files".to_string(),
            Value::Array(self.files.iter().cloned().map(Value::Object).collect()),
        );
        root.insert("meta".to_string(), Value::Object(self.meta.clone()));
        Value::Object(root)
    }
}
