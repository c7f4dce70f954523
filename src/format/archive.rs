//! Archive formats.
//!
//! [`ZipMember`] extracts values from *inside* one archive member by
//! delegating to a nested format; [`ZipInfo`] queries the archive's own
//! structure (member directory and top-level metadata).

use std::io::{Cursor, Read};

use serde_json::{Map, Value, json};
use tracing::debug;
use zip::ZipArchive;

use crate::error::{ContextValueError, FormatError, SourceProviderError};
use crate::filters::CompiledFilters;
use crate::format::{EvalError, FileFormat, Format, format_from_config};
use crate::jsonpath;
use crate::key::Key;
use crate::storage::ByteStream;
use crate::value::ConfigValue;

/// A member from a zip archive, parsed by a nested format.
///
/// The member is selected by matching filters against its directory
/// attributes (`name`, `size`, `compressed_size`, `crc32`, `is_dir`,
/// `comment`); exactly one member must match. An empty archive fails before
/// filter matching so it stays diagnosable on its own.
#[derive(Debug, Clone)]
pub struct ZipMember {
    filters: ConfigValue,
    format: Box<dyn Format>,
}

impl ZipMember {
    pub fn new(filters: impl Into<ConfigValue>, format: Box<dyn Format>) -> Self {
        Self {
            filters: filters.into(),
            format,
        }
    }

    /// Select the unique matching member and buffer its contents so the
    /// nested format receives a seekable stream.
    fn member_data(&self, stream: &mut dyn ByteStream) -> Result<Cursor<Vec<u8>>, FormatError> {
        let mut archive =
            ZipArchive::new(stream).map_err(|e| FormatError::Parse(e.to_string()))?;

        if archive.is_empty() {
            return Err(FormatError::EmptyArchive);
        }

        let filters = CompiledFilters::compile(&self.filters)
            .map_err(|e| FormatError::InvalidFilters(e.to_string()))?;

        let mut matches = Vec::new();
        for index in 0..archive.len() {
            let member = archive
                .by_index(index)
                .map_err(|e| FormatError::Parse(e.to_string()))?;
            if filters.matches(&member_attrs(&member)) {
                matches.push(index);
            }
        }

        let index = match matches.as_slice() {
            [] => {
                return Err(FormatError::NoMatchingMembers(
                    filters.display().to_string(),
                ));
            }
            [index] => *index,
            _ => {
                return Err(FormatError::MultipleMatchingMembers(
                    filters.display().to_string(),
                ));
            }
        };

        let mut member = archive
            .by_index(index)
            .map_err(|e| FormatError::Parse(e.to_string()))?;
        debug!(member = member.name(), "reading archive member");

        let mut data = Vec::new();
        member.read_to_end(&mut data)?;
        Ok(Cursor::new(data))
    }
}

impl Format for ZipMember {
    fn get_values(
        &self,
        stream: &mut dyn ByteStream,
        keys: &[Key],
    ) -> Result<std::collections::HashMap<Key, Value>, FormatError> {
        let mut member = self.member_data(stream)?;
        self.format.get_values(&mut member, keys)
    }

    fn get_value(&self, stream: &mut dyn ByteStream, key: &Key) -> Result<Value, FormatError> {
        let mut member = self.member_data(stream)?;
        self.format.get_value(&mut member, key)
    }

    fn resolve_context_values(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        self.filters.resolve(snapshot)?;
        self.format.resolve_context_values(snapshot)
    }

    fn clone_box(&self) -> Box<dyn Format> {
        Box::new(self.clone())
    }
}

pub(super) fn zip_member_from_config(
    args: &Map<String, Value>,
) -> Result<Box<dyn Format>, SourceProviderError> {
    crate::provider::check_fields(args, &["filters", "format"])?;

    let filters = args
        .get("filters")
        .map(ConfigValue::from_config)
        .unwrap_or_else(ConfigValue::empty_mapping);

    let format = args
        .get("format")
        .ok_or_else(|| SourceProviderError::MissingArgument("format".to_string()))?;
    let format = format
        .as_object()
        .ok_or_else(|| SourceProviderError::InvalidArgument {
            name: "format".to_string(),
            reason: format!(
                "must be an object, got {}",
                crate::value::json_type_name(format)
            ),
        })?;

    Ok(Box::new(ZipMember::new(filters, format_from_config(format)?)))
}

/// Query an archive's member directory and top-level metadata.
///
/// The archive is exposed as a JSON-shaped structure
/// `{"name": ..., "comment": ..., "members": [...]}` queryable with the
/// JSON path engine — useful for extracting the archive's *structure* rather
/// than a member's *contents*. The archive name is only known for named
/// streams and is `null` otherwise.
#[derive(Debug, Clone, Default)]
pub struct ZipInfo;

impl FileFormat for ZipInfo {
    type Data = Value;

    fn parse_data(&self, stream: &mut dyn ByteStream) -> Result<Self::Data, FormatError> {
        let mut archive =
            ZipArchive::new(stream).map_err(|e| FormatError::Parse(e.to_string()))?;

        let mut members = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let member = archive
                .by_index(index)
                .map_err(|e| FormatError::Parse(e.to_string()))?;
            members.push(Value::Object(member_attrs(&member)));
        }

        Ok(json!({
            "name": Value::Null,
            "comment": String::from_utf8_lossy(archive.comment()),
            "members": members,
        }))
    }

    fn eval_key(&self, data: &Self::Data, key: &Key) -> Result<Value, EvalError> {
        let values = jsonpath::query(data, key.key())
            .map_err(|e| EvalError::Message(e.to_string()))?;
        Ok(key.resolve_list_match(values)?)
    }
}

pub(super) fn zip_info_from_config(
    args: &Map<String, Value>,
) -> Result<Box<dyn Format>, SourceProviderError> {
    crate::provider::check_fields(args, &[])?;
    Ok(Box::new(ZipInfo))
}

/// Directory attributes a member can be filtered and queried on.
fn member_attrs<R: Read + std::io::Seek>(member: &zip::read::ZipFile<'_, R>) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("name".to_string(), json!(member.name()));
    attrs.insert("size".to_string(), json!(member.size()));
    attrs.insert("compressed_size".to_string(), json!(member.compressed_size()));
    attrs.insert("crc32".to_string(), json!(member.crc32()));
    attrs.insert("is_dir".to_string(), json!(member.is_dir()));
    attrs.insert("comment".to_string(), json!(member.comment()));
    attrs
}
