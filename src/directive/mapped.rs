//! The `mapped` directive: a value pulled from a metadata source.

use serde_json::{Map, Value};

use crate::context::Context;
use crate::directive::{TemplateDirective, key_param, string_param};
use crate::error::MetadataMapperError;
use crate::key::Key;
use crate::source::SourceMap;

/// A value mapped into the template from a named source.
///
/// `prepare` registers the key with the source; `call` returns the value the
/// source cached for it during the query pass.
#[derive(Debug)]
pub struct Mapped {
    source: String,
    key: Key,
}

impl Mapped {
    pub(super) fn build(
        _context: &Context,
        sources: &SourceMap,
        params: &Map<String, Value>,
    ) -> Result<Box<dyn TemplateDirective>, MetadataMapperError> {
        let source = string_param(params, "source")?;
        if !sources.contains_key(source) {
            return Err(MetadataMapperError::NoSuchSource(source.to_string()));
        }

        Ok(Box::new(Self {
            source: source.to_string(),
            key: key_param(params)?,
        }))
    }
}

impl TemplateDirective for Mapped {
    fn prepare(&self, sources: &mut SourceMap) -> Result<(), MetadataMapperError> {
        let source = sources
            .get_mut(&self.source)
            .ok_or_else(|| MetadataMapperError::NoSuchSource(self.source.clone()))?;
        source.add_key(self.key.clone());
        Ok(())
    }

    fn call(&self, sources: &SourceMap) -> Result<Value, MetadataMapperError> {
        let source = sources
            .get(&self.source)
            .ok_or_else(|| MetadataMapperError::NoSuchSource(self.source.clone()))?;
        source.get_value(&self.key)
    }
}
