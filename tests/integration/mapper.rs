//! End-to-end resolution runs.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use metamap::format::{EvalError, FileFormat};
use metamap::storage::ByteStream;
use metamap::{
    ConfigSourceProvider, Context, FileSource, Key, MetadataMapper, MetadataMapperError,
    StaticSourceProvider,
};

use crate::fixture_files;

fn sources_config() -> Value {
    json!({
        "fixed_name_file": {
            "storage": {
                "class": "LocalFile",
                "filters": {"name": r"fixed_name_file\.json"},
            },
            "format": {"class": "Json"},
        },
        "name_match_file": {
            "storage": {
                "class": "LocalFile",
                "filters": {"name": r".*match_me\.json"},
            },
            "format": {"class": "Json"},
        },
    })
}

fn template() -> Value {
    json!({
        "foo": {"@mapped": {"source": "fixed_name_file", "key": "foo"}},
        "outer": {
            "nested": {"@mapped": {"source": "fixed_name_file", "key": "nested.key"}},
            "bar": {"@mapped": {"source": "name_match_file", "key": "bar"}},
        },
    })
}

fn fixture_context() -> (tempfile::TempDir, Context) {
    let (dir, files) = fixture_files(&[
        (
            "fixed_name_file.json",
            r#"{"foo": "value for foo", "nested": {"key": "value for nested"}}"#,
        ),
        ("first_match_me.json", r#"{"bar": "value for bar"}"#),
        ("dont_match.json", "{}"),
    ]);
    (dir, Context::new().with_files(files))
}

fn mapper() -> MetadataMapper {
    MetadataMapper::new(template())
        .with_source_provider(ConfigSourceProvider::from_value(sources_config()))
}

#[test]
fn test_basic_multi_source_resolution() {
    let (_dir, context) = fixture_context();

    assert_eq!(
        mapper().get_metadata(&context).unwrap(),
        json!({
            "foo": "value for foo",
            "outer": {
                "nested": "value for nested",
                "bar": "value for bar",
            },
        })
    );
}

#[test]
fn test_identical_providers_resolve_identically() {
    let (_dir, context) = fixture_context();

    let first = mapper().get_metadata(&context).unwrap();
    let second = mapper().get_metadata(&context).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_empty_context_reports_no_files() {
    let err = mapper().get_metadata(&Context::new()).unwrap_err();
    let message = err.to_string();
    assert!(
        message.starts_with("failed to query source '"),
        "unexpected message: {message}"
    );
    assert!(
        message.ends_with("no files in context"),
        "unexpected message: {message}"
    );
}

#[test]
fn test_no_matching_files_is_distinct() {
    let (_dir, files) = fixture_files(&[("unrelated.json", "{}")]);
    let context = Context::new().with_files(files);

    let mapper = MetadataMapper::new(json!({
        "foo": {"@mapped": {"source": "fixed_name_file", "key": "foo"}},
    }))
    .with_source_provider(ConfigSourceProvider::from_value(json!({
        "fixed_name_file": sources_config()["fixed_name_file"],
    })));

    let err = mapper.get_metadata(&context).unwrap_err();
    assert!(
        err.to_string().contains("no files matched filters"),
        "unexpected message: {err}"
    );
}

#[test]
fn test_missing_document_key_names_the_key() {
    let (_dir, context) = fixture_context();

    let mapper = MetadataMapper::new(json!({
        "foo": {"@mapped": {"source": "fixed_name_file", "key": "does_not_exist"}},
    }))
    .with_source_provider(ConfigSourceProvider::from_value(json!({
        "fixed_name_file": sources_config()["fixed_name_file"],
    })));

    let err = mapper.get_metadata(&context).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to query source 'fixed_name_file': key not found 'does_not_exist'"
    );
}

#[test]
fn test_missing_key_with_default_resolves() {
    let (_dir, context) = fixture_context();

    let mapper = MetadataMapper::new(json!({
        "foo": {"@mapped": {
            "source": "fixed_name_file",
            "key": "does_not_exist",
            "key_options": {"default": null},
        }},
    }))
    .with_source_provider(ConfigSourceProvider::from_value(json!({
        "fixed_name_file": sources_config()["fixed_name_file"],
    })));

    assert_eq!(
        mapper.get_metadata(&context).unwrap(),
        json!({"foo": null})
    );
}

#[test]
fn test_conflicting_key_options_fail_with_debug_path() {
    let mapper = MetadataMapper::new(json!({
        "foo": {"@mapped": {
            "source": "f",
            "key": "a",
            "key_options": {"return_list": true, "return_first": true},
        }},
    }))
    .with_source_provider(ConfigSourceProvider::from_value(json!({
        "f": {
            "storage": {"class": "Dummy", "data": "{}"},
            "format": {"class": "Json"},
        },
    })));

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to process template at $.foo.@mapped: \
         return_list and return_first are mutually exclusive"
    );
}

/// A format wrapper that counts how many times the document is parsed.
#[derive(Debug, Clone)]
struct CountingJson {
    parses: Arc<AtomicUsize>,
}

impl FileFormat for CountingJson {
    type Data = Value;

    fn parse_data(&self, stream: &mut dyn ByteStream) -> Result<Self::Data, metamap::FormatError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        serde_json::from_slice(&bytes).map_err(|e| metamap::FormatError::Parse(e.to_string()))
    }

    fn eval_key(&self, data: &Self::Data, key: &Key) -> Result<Value, EvalError> {
        let values = metamap::jsonpath::query(data, key.key())
            .map_err(|e| EvalError::Message(e.to_string()))?;
        Ok(key.resolve_list_match(values)?)
    }
}

#[test]
fn test_equal_keys_collapse_to_one_parse() {
    let parses = Arc::new(AtomicUsize::new(0));
    let format = CountingJson {
        parses: Arc::clone(&parses),
    };

    let provider = StaticSourceProvider::default().with_source(
        "f",
        Box::new(FileSource::new(
            Box::new(metamap::storage::Dummy::new(r#"{"a": {"b": 1}}"#)),
            Box::new(format),
        )),
    );

    // The same logical key from two template locations, plus a distinct one.
    let mapper = MetadataMapper::new(json!({
        "first": {"@mapped": {"source": "f", "key": "a.b"}},
        "second": {"@mapped": {"source": "f", "key": "a.b"}},
        "third": {"@mapped": {"source": "f", "key": "a"}},
    }))
    .with_source_provider(provider);

    let record = mapper.get_metadata(&Context::new()).unwrap();
    assert_eq!(
        record,
        json!({"first": 1, "second": 1, "third": {"b": 1}})
    );
    assert_eq!(parses.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unqueried_source_never_opens_its_file() {
    // A second source with an unparseable payload: if it were opened the
    // run would fail, but no template key references it.
    let provider = ConfigSourceProvider::from_value(json!({
        "used": {
            "storage": {"class": "Dummy", "data": "{\"a\": 1}"},
            "format": {"class": "Json"},
        },
        "untouched": {
            "storage": {"class": "Dummy", "data": "definitely not json"},
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "a": {"@mapped": {"source": "used", "key": "a"}},
    }))
    .with_source_provider(provider);

    assert_eq!(
        mapper.get_metadata(&Context::new()).unwrap(),
        json!({"a": 1})
    );
}

#[test]
fn test_zip_member_source_end_to_end() {
    use std::io::Write;

    let buffer = {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("inner/meta.json", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(br#"{"id": "G-001"}"#).unwrap();
        writer.start_file("readme.txt", zip::write::SimpleFileOptions::default()).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap().into_inner()
    };

    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("granule.zip");
    std::fs::write(&archive_path, buffer).unwrap();

    let provider = ConfigSourceProvider::from_value(json!({
        "archive": {
            "storage": {
                "class": "LocalFile",
                "filters": {"name": r".*\.zip"},
            },
            "format": {
                "class": "ZipMember",
                "filters": {"name": r".*meta\.json"},
                "format": {"class": "Json"},
            },
        },
        "archive_info": {
            "storage": {
                "class": "LocalFile",
                "filters": {"name": r".*\.zip"},
            },
            "format": {"class": "ZipInfo"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "id": {"@mapped": {"source": "archive", "key": "id"}},
        "first_member": {"@mapped": {"source": "archive_info", "key": "members[0].name"}},
    }))
    .with_source_provider(provider);

    let context = crate::context(
        json!([{"name": "granule.zip", "path": archive_path.to_str().unwrap()}]),
        json!({}),
    );

    assert_eq!(
        mapper.get_metadata(&context).unwrap(),
        json!({"id": "G-001", "first_member": "inner/meta.json"})
    );
}

#[test]
fn test_template_error_type_is_preserved() {
    let mapper = MetadataMapper::new(json!({"foo": {"@nope": {}}}));
    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert!(matches!(err, MetadataMapperError::Template(_)));
}
