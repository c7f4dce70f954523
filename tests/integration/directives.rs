//! Directive behavior through full resolution runs.

use serde_json::json;

use metamap::{ConfigSourceProvider, Context, MetadataMapper};

fn json_dummy_provider(payload: &str) -> ConfigSourceProvider {
    ConfigSourceProvider::from_value(json!({
        "file": {
            "storage": {"class": "Dummy", "data": payload},
            "format": {"class": "Json"},
        },
    }))
}

#[test]
fn test_mapped_non_existent_source() {
    let mapper = MetadataMapper::new(json!({
        "foo": {"@mapped": {"source": "does not exist", "key": "foo"}},
    }))
    .with_source_provider(ConfigSourceProvider::from_value(json!({})));

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to process template at $.foo.@mapped: \
         source 'does not exist' does not exist"
    );
}

#[test]
fn test_reformatted_json_field_in_json() {
    let mapper = MetadataMapper::new(json!({
        "@reformatted": {
            "format": "Json",
            "value": {"@mapped": {"source": "file", "key": "some_field"}},
            "key": "foo",
        },
    }))
    .with_source_provider(json_dummy_provider(
        r#"{"some_field": "{\"foo\": \"bar\"}"}"#,
    ));

    assert_eq!(mapper.get_metadata(&Context::new()).unwrap(), json!("bar"));
}

#[cfg(feature = "xml")]
#[test]
fn test_reformatted_json_field_in_xml() {
    let provider = ConfigSourceProvider::from_value(json!({
        "file": {
            "storage": {
                "class": "Dummy",
                "data": r#"<root><json-field>{"foo": "bar"}</json-field></root>"#,
            },
            "format": {"class": "Xml"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "@reformatted": {
            "format": "Json",
            "value": {"@mapped": {"source": "file", "key": "/root/json-field"}},
            "key": "foo",
        },
    }))
    .with_source_provider(provider);

    assert_eq!(mapper.get_metadata(&Context::new()).unwrap(), json!("bar"));
}

#[cfg(feature = "xml")]
#[test]
fn test_reformatted_whole_value() {
    let provider = ConfigSourceProvider::from_value(json!({
        "file": {
            "storage": {
                "class": "Dummy",
                "data": r#"<root><json-field>{"foo": "bar"}</json-field></root>"#,
            },
            "format": {"class": "Xml"},
        },
    }));

    let mapper = MetadataMapper::new(json!({
        "@reformatted": {
            "format": "Json",
            "value": {"@mapped": {"source": "file", "key": "/root/json-field"}},
            "key": "$",
        },
    }))
    .with_source_provider(provider);

    assert_eq!(
        mapper.get_metadata(&Context::new()).unwrap(),
        json!({"foo": "bar"})
    );
}

#[cfg(feature = "xml")]
#[test]
fn test_reformatted_xml_field_in_json() {
    let mapper = MetadataMapper::new(json!({
        "@reformatted": {
            "format": "Xml",
            "value": {"@mapped": {"source": "file", "key": "foo"}},
            "key": "/root/field",
        },
    }))
    .with_source_provider(json_dummy_provider(
        r#"{"foo": "<root><field>bar</field></root>"}"#,
    ));

    assert_eq!(mapper.get_metadata(&Context::new()).unwrap(), json!("bar"));
}

#[test]
fn test_reformatted_bad_value_type() {
    let mapper = MetadataMapper::new(json!({
        "@reformatted": {
            "format": "Json",
            "value": {"@mapped": {"source": "file", "key": "foo"}},
            "key": "$",
        },
    }))
    .with_source_provider(json_dummy_provider(r#"{"foo": true}"#));

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert!(
        err.to_string().contains("but got 'boolean'"),
        "unexpected message: {err}"
    );
}

#[test]
fn test_reformatted_nested_reformatted() {
    // The inner reformatted extracts an XML string from embedded JSON; the
    // outer one parses that XML. Bottom-up replacement makes it compose.
    let mapper = MetadataMapper::new(json!({
        "@reformatted": {
            "format": "Json",
            "value": {
                "@reformatted": {
                    "format": "Json",
                    "value": r#"{"inner": "{\"deep\": 7}"}"#,
                    "key": "inner",
                },
            },
            "key": "deep",
        },
    }));

    assert_eq!(mapper.get_metadata(&Context::new()).unwrap(), json!(7));
}

#[test]
fn test_reformatted_nested_missing_parameter() {
    let mapper = MetadataMapper::new(json!({
        "@reformatted": {
            "format": "Json",
            "value": {
                "@reformatted": {"format": "Json", "key": "foo"},
            },
            "key": "/root/field",
        },
    }))
    .with_source_provider(ConfigSourceProvider::from_value(json!({})));

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to process template at $.@reformatted.value.@reformatted: \
         missing key: 'value'"
    );
}

#[test]
fn test_arithmetic_over_constants() {
    let mapper = MetadataMapper::new(json!({
        "integers": {"@add": {"left": 1, "right": 2}},
        "floats": {"@add": {"left": 1.5, "right": 2}},
        "strings": {"@add": {"left": "hello ", "right": "world"}},
        "lists": {"@add": {"left": [1, 2], "right": [3, 4]}},
        "quotient": {"@truediv": {"left": 7, "right": 2}},
        "floored": {"@floordiv": {"left": 7, "right": 2}},
    }));

    assert_eq!(
        mapper.get_metadata(&Context::new()).unwrap(),
        json!({
            "integers": 3,
            "floats": 3.5,
            "strings": "hello world",
            "lists": [1, 2, 3, 4],
            "quotient": 3.5,
            "floored": 3,
        })
    );
}

#[test]
fn test_arithmetic_over_mapped_values() {
    let mapper = MetadataMapper::new(json!({
        "@add": {
            "left": {"@mapped": {"source": "file", "key": "a"}},
            "right": {"@mapped": {"source": "file", "key": "b"}},
        },
    }))
    .with_source_provider(json_dummy_provider(r#"{"a": 40, "b": 2}"#));

    assert_eq!(mapper.get_metadata(&Context::new()).unwrap(), json!(42));
}

#[test]
fn test_division_by_zero_surfaces_debug_path() {
    let mapper = MetadataMapper::new(json!({
        "result": {"@floordiv": {"left": 1, "right": 0}},
    }));

    let err = mapper.get_metadata(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to evaluate template: failed to call directive at $.result.@floordiv: \
         division by zero"
    );
}

#[test]
fn test_builder_template_resolves() {
    use metamap::builder::{TemplateNode, build, mapped};

    let template = build(
        TemplateNode::Mapping(vec![
            ("total".to_string(), (mapped("file", "a") + 2).into()),
            ("constant".to_string(), "fixed".into()),
        ]),
        "@",
    );

    let mapper = MetadataMapper::new(template)
        .with_source_provider(json_dummy_provider(r#"{"a": 40}"#));

    assert_eq!(
        mapper.get_metadata(&Context::new()).unwrap(),
        json!({"total": 42, "constant": "fixed"})
    );
}
