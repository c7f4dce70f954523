//! Provider configuration and context-value substitution end to end.

use serde_json::json;

use metamap::{ConfigSourceProvider, Context, MetadataMapper, MetadataMapperError};

use crate::{context, fixture_files};

#[test]
fn test_whole_filter_mapping_from_context() {
    let (_dir, files) = fixture_files(&[("granule.json", r#"{"id": "G1"}"#)]);

    let provider = ConfigSourceProvider::from_value(json!({
        "granule": {
            "storage": {"class": "LocalFile", "filters": "$.meta.filters"},
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "id": {"@mapped": {"source": "granule", "key": "id"}},
    }))
    .with_source_provider(provider);

    let context = Context::new()
        .with_files(files)
        .with_meta(
            json!({"filters": {"name": r"granule\.json"}})
                .as_object()
                .unwrap()
                .clone(),
        );

    assert_eq!(mapper.get_metadata(&context).unwrap(), json!({"id": "G1"}));
}

#[test]
fn test_single_filter_value_from_context() {
    let (_dir, files) = fixture_files(&[
        ("first.json", r#"{"v": 1}"#),
        ("second.json", r#"{"v": 2}"#),
    ]);

    let provider = ConfigSourceProvider::from_value(json!({
        "picked": {
            "storage": {
                "class": "LocalFile",
                "filters": {"name": "$.meta.name_filter"},
            },
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "v": {"@mapped": {"source": "picked", "key": "v"}},
    }))
    .with_source_provider(provider);

    let context = Context::new()
        .with_files(files)
        .with_meta(
            json!({"name_filter": r"second\.json"})
                .as_object()
                .unwrap()
                .clone(),
        );

    assert_eq!(mapper.get_metadata(&context).unwrap(), json!({"v": 2}));
}

#[test]
fn test_doubled_sentinel_is_not_a_placeholder() {
    // "$$.meta.not-replaced" unwraps to the literal string
    // "$.meta.not-replaced". If it were treated as a context path the run
    // would fail during context substitution (the path matches nothing);
    // instead resolution proceeds to the query phase.
    let provider = ConfigSourceProvider::from_value(json!({
        "file": {
            "storage": {
                "class": "LocalFile",
                "filters": {"name": "$$.meta.not-replaced"},
            },
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "x": {"@mapped": {"source": "file", "key": "x"}},
    }))
    .with_source_provider(provider);

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert!(
        !matches!(err, MetadataMapperError::ContextSubstitution { .. }),
        "sentinel escape was treated as a context value: {err}"
    );
    assert_eq!(
        err.to_string(),
        "failed to query source 'file': no files in context"
    );
}

#[test]
fn test_missing_context_value_names_source_and_path() {
    let provider = ConfigSourceProvider::from_value(json!({
        "test": {
            "storage": {"class": "LocalFile", "filters": "$.meta.missing"},
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({})).with_source_provider(provider);

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to process context values for source 'test': \
         no values found for context path '$.meta.missing'"
    );
    assert!(matches!(
        err,
        MetadataMapperError::ContextSubstitution { .. }
    ));
}

#[cfg(feature = "jsonpath")]
#[test]
fn test_multi_valued_context_path_is_rejected() {
    let provider = ConfigSourceProvider::from_value(json!({
        "test": {
            "storage": {"class": "LocalFile", "filters": "$.meta.foo[*].bar"},
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({})).with_source_provider(provider);

    let ctx = context(json!([]), json!({"foo": [{"bar": 1}, {"bar": 2}]}));
    let err = mapper.get_metadata(&ctx).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to process context values for source 'test': \
         context path '$.meta.foo[*].bar' returned more than one value"
    );
}

#[cfg(feature = "jsonpath")]
#[test]
fn test_invalid_context_path_is_rejected() {
    let provider = ConfigSourceProvider::from_value(json!({
        "test": {
            "storage": {"class": "LocalFile", "filters": "$.meta.bad["},
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({})).with_source_provider(provider);

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    let message = err.to_string();
    assert!(
        message.starts_with(
            "failed to process context values for source 'test': \
             invalid context path '$.meta.bad['"
        ),
        "unexpected message: {message}"
    );
}

#[test]
fn test_unused_sources_are_still_constructed() {
    // Construction errors surface even when no template key references the
    // source.
    let provider = ConfigSourceProvider::from_value(json!({
        "broken": {
            "storage": {"class": "NotARealStorage"},
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({})).with_source_provider(provider);

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to create source 'broken': invalid storage type 'NotARealStorage'"
    );
}

#[test]
fn test_registered_custom_storage_kind() {
    use metamap::storage::{ByteStream, Storage};

    // A storage that serves the byte representation of a fixed record,
    // registered under a custom tag and addressed from configuration.
    #[derive(Debug, Clone)]
    struct Fixed;

    impl Storage for Fixed {
        fn open_file(
            &self,
            _context: &Context,
        ) -> Result<Box<dyn ByteStream>, metamap::StorageError> {
            Ok(Box::new(std::io::Cursor::new(
                br#"{"fixed": true}"#.to_vec(),
            )))
        }

        fn clone_box(&self) -> Box<dyn Storage> {
            Box::new(self.clone())
        }
    }

    metamap::storage::register_storage_kind("Fixed", |args| {
        if let Some(key) = args.keys().next() {
            return Err(metamap::SourceProviderError::UnexpectedArgument(
                key.clone(),
            ));
        }
        Ok(Box::new(Fixed))
    });

    let provider = ConfigSourceProvider::from_value(json!({
        "fixed": {
            "storage": {"class": "Fixed"},
            "format": {"class": "Json"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "fixed": {"@mapped": {"source": "fixed", "key": "fixed"}},
    }))
    .with_source_provider(provider);

    assert_eq!(
        mapper.get_metadata(&Context::new()).unwrap(),
        json!({"fixed": true})
    );
}
