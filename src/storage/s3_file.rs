//! Object-storage file access (feature `s3`).

use std::io::Cursor;

use s3::creds::Credentials;
use s3::{Bucket, Region};
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::error::{ContextValueError, SourceProviderError, StorageError};
use crate::storage::{ByteStream, Storage, select_file};
use crate::value::ConfigValue;

/// A storage which reads a bucket/key addressed object.
///
/// The matched file descriptor must carry `bucket` and `key` attributes.
/// Credentials come from the standard environment/profile chain.
#[derive(Debug, Clone, Default)]
pub struct S3File {
    filters: ConfigValue,
    region: ConfigValue,
}

impl S3File {
    pub fn new(filters: impl Into<ConfigValue>) -> Self {
        Self {
            filters: filters.into(),
            region: ConfigValue::Null,
        }
    }

    pub fn with_region(mut self, region: impl Into<ConfigValue>) -> Self {
        self.region = region.into();
        self
    }

    pub(super) fn from_config(
        args: &serde_json::Map<String, Value>,
    ) -> Result<Box<dyn Storage>, SourceProviderError> {
        crate::provider::check_fields(args, &["filters", "region"])?;
        let mut storage = Self::default();
        if let Some(filters) = args.get("filters") {
            storage.filters = ConfigValue::from_config(filters);
        }
        if let Some(region) = args.get("region") {
            storage.region = ConfigValue::from_config(region);
        }
        Ok(Box::new(storage))
    }

    fn region(&self) -> Result<Region, StorageError> {
        let name = match &self.region {
            ConfigValue::Null => return Ok(Region::UsEast1),
            ConfigValue::String(s) => s.clone(),
            other => {
                return Err(StorageError::InvalidParameter {
                    name: "region",
                    reason: format!("must be a string, got {}", other.type_name()),
                });
            }
        };
        name.parse::<Region>()
            .map_err(|e| StorageError::S3(e.to_string()))
    }
}

impl Storage for S3File {
    fn open_file(&self, context: &Context) -> Result<Box<dyn ByteStream>, StorageError> {
        let info = select_file(context, &self.filters)?;
        let bucket_name = info
            .get("bucket")
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::MissingAttribute("bucket".to_string()))?;
        let key = info
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::MissingAttribute("key".to_string()))?;

        debug!(bucket = bucket_name, key, "opening object");

        let credentials = Credentials::default().map_err(|e| StorageError::S3(e.to_string()))?;
        let bucket = Bucket::new(bucket_name, self.region()?, credentials)
            .map_err(|e| StorageError::S3(e.to_string()))?;

        let response = bucket
            .get_object(key)
            .map_err(|e| StorageError::S3(e.to_string()))?;
        if response.status_code() != 200 {
            return Err(StorageError::S3(format!(
                "unexpected status {} for s3://{bucket_name}/{key}",
                response.status_code()
            )));
        }

        Ok(Box::new(Cursor::new(response.bytes().to_vec())))
    }

    fn resolve_context_values(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        self.filters.resolve(snapshot)?;
        self.region.resolve(snapshot)
    }

    fn clone_box(&self) -> Box<dyn Storage> {
        Box::new(self.clone())
    }
}
