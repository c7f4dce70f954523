//! The `reformatted` directive: re-parse an embedded document.

use std::io::Cursor;

use serde_json::{Map, Value};

use crate::context::Context;
use crate::directive::{TemplateDirective, key_param, string_param};
use crate::error::MetadataMapperError;
use crate::format::{Format, format_from_tag};
use crate::key::Key;
use crate::source::SourceMap;

/// Parse a value that is itself an embedded document and query it.
///
/// This is the mechanism for extracting structured data embedded as a string
/// inside another document (a JSON blob in an XML element, say). Because the
/// replace pass reduces directive bodies depth first, the `value` parameter
/// may itself be a `mapped` or `reformatted` node, so reformatting composes
/// recursively.
#[derive(Debug)]
pub struct Reformatted {
    format: Box<dyn Format>,
    value: Value,
    key: Key,
}

impl Reformatted {
    pub(super) fn build(
        _context: &Context,
        _sources: &SourceMap,
        params: &Map<String, Value>,
    ) -> Result<Box<dyn TemplateDirective>, MetadataMapperError> {
        let format_tag = string_param(params, "format")?;
        let factory = format_from_tag(format_tag)
            .map_err(|_| MetadataMapperError::NoSuchFormat(format_tag.to_string()))?;
        let format = factory(&Map::new())?;

        let value = params
            .get("value")
            .cloned()
            .ok_or_else(|| MetadataMapperError::Directive("missing key: 'value'".to_string()))?;

        Ok(Box::new(Self {
            format,
            value,
            key: key_param(params)?,
        }))
    }
}

impl TemplateDirective for Reformatted {
    fn call(&self, _sources: &SourceMap) -> Result<Value, MetadataMapperError> {
        let text = self.value.as_str().ok_or_else(|| {
            MetadataMapperError::Directive(format!(
                "value must be a string but got '{}'",
                crate::value::json_type_name(&self.value)
            ))
        })?;

        let mut stream = Cursor::new(text.as_bytes().to_vec());
        Ok(self.format.get_value(&mut stream, &self.key)?)
    }
}
