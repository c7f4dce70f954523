//! Integration test suite for metamap
//!
//! End-to-end template resolution through the public API: real files on
//! disk, configuration-built providers, and multi-source templates.
//!
//! ```bash
//! cargo test --test integration
//! ```

mod directives;
mod mapper;
mod provider;

use serde_json::{Map, Value};

use metamap::Context;

/// Build a context from JSON-shaped file descriptors and metadata.
pub fn context(files: Value, meta: Value) -> Context {
    Context::new()
        .with_files(
            files
                .as_array()
                .expect("files fixture must be an array")
                .iter()
                .map(|file| {
                    file.as_object()
                        .expect("file fixture must be an object")
                        .clone()
                })
                .collect(),
        )
        .with_meta(
            meta.as_object()
                .expect("meta fixture must be an object")
                .clone(),
        )
}

/// Write fixture files into a temp dir and return matching descriptors.
pub fn fixture_files(entries: &[(&str, &str)]) -> (tempfile::TempDir, Vec<Map<String, Value>>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let mut descriptors = Vec::new();

    for (name, contents) in entries {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");

        let mut descriptor = Map::new();
        descriptor.insert("name".to_string(), Value::from(*name));
        descriptor.insert(
            "path".to_string(),
            Value::from(path.to_str().expect("utf-8 path")),
        );
        descriptors.push(descriptor);
    }

    (dir, descriptors)
}
