//! HTTP-backed storages.
//!
//! [`HttpRequest`] buffers the body of a configurable HTTP response into a
//! seekable stream. [`CmrQuery`] is a convenience variant that composes a
//! CMR-style URL from a base URL, path and response format, and injects an
//! `Authorization` token header.

use std::io::Cursor;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::Context;
use crate::error::{ContextValueError, SourceProviderError, StorageError};
use crate::storage::{ByteStream, Storage};
use crate::value::ConfigValue;

/// A storage which returns the body of an HTTP response.
///
/// Method, headers, query parameters and body are all configurable; every
/// parameter may be a deferred context value. The response body is buffered
/// in memory regardless of status code.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    url: ConfigValue,
    method: ConfigValue,
    params: ConfigValue,
    data: ConfigValue,
    json: ConfigValue,
    headers: ConfigValue,
    timeout: ConfigValue,
    allow_redirects: bool,
}

impl HttpRequest {
    pub fn new(url: impl Into<ConfigValue>) -> Self {
        Self {
            url: url.into(),
            method: ConfigValue::from("GET"),
            params: ConfigValue::Null,
            data: ConfigValue::Null,
            json: ConfigValue::Null,
            headers: ConfigValue::Null,
            timeout: ConfigValue::Null,
            allow_redirects: true,
        }
    }

    pub fn with_method(mut self, method: impl Into<ConfigValue>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_params(mut self, params: impl Into<ConfigValue>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_data(mut self, data: impl Into<ConfigValue>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_json(mut self, json: impl Into<ConfigValue>) -> Self {
        self.json = json.into();
        self
    }

    pub fn with_headers(mut self, headers: impl Into<ConfigValue>) -> Self {
        self.headers = headers.into();
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = ConfigValue::from_json(&Value::from(seconds));
        self
    }

    pub fn with_allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    pub(super) fn from_config(
        args: &Map<String, Value>,
    ) -> Result<Box<dyn Storage>, SourceProviderError> {
        crate::provider::check_fields(
            args,
            &[
                "url",
                "method",
                "params",
                "data",
                "json",
                "headers",
                "timeout",
                "allow_redirects",
            ],
        )?;

        let url = args
            .get("url")
            .ok_or_else(|| SourceProviderError::MissingArgument("url".to_string()))?;

        let mut storage = Self::new(ConfigValue::from_config(url));
        if let Some(method) = args.get("method") {
            storage.method = ConfigValue::from_config(method);
        }
        if let Some(params) = args.get("params") {
            storage.params = ConfigValue::from_config(params);
        }
        if let Some(data) = args.get("data") {
            storage.data = ConfigValue::from_config(data);
        }
        if let Some(json) = args.get("json") {
            storage.json = ConfigValue::from_config(json);
        }
        if let Some(headers) = args.get("headers") {
            storage.headers = ConfigValue::from_config(headers);
        }
        if let Some(timeout) = args.get("timeout") {
            storage.timeout = ConfigValue::from_config(timeout);
        }
        if let Some(allow) = args.get("allow_redirects") {
            storage.allow_redirects =
                allow
                    .as_bool()
                    .ok_or_else(|| SourceProviderError::InvalidArgument {
                        name: "allow_redirects".to_string(),
                        reason: format!(
                            "must be a boolean, got {}",
                            crate::value::json_type_name(allow)
                        ),
                    })?;
        }
        Ok(Box::new(storage))
    }

    fn request_spec(&self) -> Result<RequestSpec, StorageError> {
        Ok(RequestSpec {
            url: required_string(&self.url, "url")?,
            method: optional_string(&self.method, "method")?.unwrap_or_else(|| "GET".to_string()),
            headers: string_pairs(&self.headers, "headers")?,
            query: string_pairs(&self.params, "params")?,
            body: optional_string(&self.data, "data")?.map(String::into_bytes),
            json: literal(&self.json, "json")?,
            timeout: optional_seconds(&self.timeout)?,
            allow_redirects: self.allow_redirects,
        })
    }
}

impl Storage for HttpRequest {
    fn open_file(&self, _context: &Context) -> Result<Box<dyn ByteStream>, StorageError> {
        self.request_spec()?.execute()
    }

    fn resolve_context_values(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        for field in [
            &mut self.url,
            &mut self.method,
            &mut self.params,
            &mut self.data,
            &mut self.json,
            &mut self.headers,
            &mut self.timeout,
        ] {
            field.resolve(snapshot)?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Storage> {
        Box::new(self.clone())
    }
}

/// A CMR-flavored HTTP request.
///
/// The request URL is composed from `base_url`, `path` and the response
/// `format` (appended as a lowercased extension); a `token`, when present,
/// is sent as the `Authorization` header. Configure `base_url` and `path`
/// rather than `url`.
#[derive(Debug, Clone)]
pub struct CmrQuery {
    base_url: ConfigValue,
    path: ConfigValue,
    format: ConfigValue,
    token: ConfigValue,
    params: ConfigValue,
    headers: ConfigValue,
    timeout: ConfigValue,
}

impl CmrQuery {
    pub fn new(base_url: impl Into<ConfigValue>) -> Self {
        Self {
            base_url: base_url.into(),
            path: ConfigValue::Null,
            format: ConfigValue::Null,
            token: ConfigValue::Null,
            params: ConfigValue::Null,
            headers: ConfigValue::Null,
            timeout: ConfigValue::Null,
        }
    }

    pub fn with_path(mut self, path: impl Into<ConfigValue>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<ConfigValue>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<ConfigValue>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_params(mut self, params: impl Into<ConfigValue>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_headers(mut self, headers: impl Into<ConfigValue>) -> Self {
        self.headers = headers.into();
        self
    }

    pub(super) fn from_config(
        args: &Map<String, Value>,
    ) -> Result<Box<dyn Storage>, SourceProviderError> {
        // Deliberately excludes `url`: it is always composed from
        // `base_url` and `path`.
        crate::provider::check_fields(
            args,
            &["base_url", "path", "format", "token", "params", "headers", "timeout"],
        )?;

        let base_url = args
            .get("base_url")
            .ok_or_else(|| SourceProviderError::MissingArgument("base_url".to_string()))?;

        let mut storage = Self::new(ConfigValue::from_config(base_url));
        for (field, name) in [
            (&mut storage.path, "path"),
            (&mut storage.format, "format"),
            (&mut storage.token, "token"),
            (&mut storage.params, "params"),
            (&mut storage.headers, "headers"),
            (&mut storage.timeout, "timeout"),
        ] {
            if let Some(value) = args.get(name) {
                *field = ConfigValue::from_config(value);
            }
        }
        Ok(Box::new(storage))
    }

    fn compose_url(&self) -> Result<String, StorageError> {
        let base = required_string(&self.base_url, "base_url")?;
        let mut path = optional_string(&self.path, "path")?.unwrap_or_default();
        if let Some(format) = optional_string(&self.format, "format")? {
            if !format.is_empty() {
                path = format!("{path}.{}", format.to_lowercase());
            }
        }

        let base = Url::parse(&base).map_err(|e| StorageError::InvalidParameter {
            name: "base_url",
            reason: e.to_string(),
        })?;
        let url = base.join(&path).map_err(|e| StorageError::InvalidParameter {
            name: "path",
            reason: e.to_string(),
        })?;
        Ok(url.to_string())
    }
}

impl Storage for CmrQuery {
    fn open_file(&self, _context: &Context) -> Result<Box<dyn ByteStream>, StorageError> {
        let mut headers = string_pairs(&self.headers, "headers")?;
        if let Some(token) = optional_string(&self.token, "token")? {
            headers.push(("Authorization".to_string(), token));
        }

        RequestSpec {
            url: self.compose_url()?,
            method: "GET".to_string(),
            headers,
            query: string_pairs(&self.params, "params")?,
            body: None,
            json: None,
            timeout: optional_seconds(&self.timeout)?,
            allow_redirects: true,
        }
        .execute()
    }

    fn resolve_context_values(&mut self, snapshot: &Value) -> Result<(), ContextValueError> {
        for field in [
            &mut self.base_url,
            &mut self.path,
            &mut self.format,
            &mut self.token,
            &mut self.params,
            &mut self.headers,
            &mut self.timeout,
        ] {
            field.resolve(snapshot)?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Storage> {
        Box::new(self.clone())
    }
}

/// A fully resolved request, ready to send.
struct RequestSpec {
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    json: Option<Value>,
    timeout: Option<f64>,
    allow_redirects: bool,
}

impl RequestSpec {
    fn execute(self) -> Result<Box<dyn ByteStream>, StorageError> {
        let policy = if self.allow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        let client = Client::builder().redirect(policy).build()?;

        let method = self.method.parse::<reqwest::Method>().map_err(|_| {
            StorageError::InvalidParameter {
                name: "method",
                reason: format!("'{}' is not a valid HTTP method", self.method),
            }
        })?;

        debug!(url = %self.url, method = %method, "sending http request");

        let mut request = client.request(method, &self.url);
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(Duration::from_secs_f64(timeout));
        }
        if let Some(body) = self.body {
            request = request.body(body);
        }
        if let Some(json) = &self.json {
            request = request.json(json);
        }

        // The entire payload is buffered so the resulting stream is seekable.
        let bytes = request.send()?.bytes()?;
        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }
}

fn literal(value: &ConfigValue, name: &'static str) -> Result<Option<Value>, StorageError> {
    match value.to_json() {
        Some(Value::Null) => Ok(None),
        Some(other) => Ok(Some(other)),
        None => Err(StorageError::InvalidParameter {
            name,
            reason: "contains an unresolved context value".to_string(),
        }),
    }
}

fn required_string(value: &ConfigValue, name: &'static str) -> Result<String, StorageError> {
    match literal(value, name)? {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(StorageError::InvalidParameter {
            name,
            reason: format!("must be a string, got {}", crate::value::json_type_name(&other)),
        }),
        None => Err(StorageError::InvalidParameter {
            name,
            reason: "is required".to_string(),
        }),
    }
}

fn optional_string(value: &ConfigValue, name: &'static str) -> Result<Option<String>, StorageError> {
    match literal(value, name)? {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(StorageError::InvalidParameter {
            name,
            reason: format!("must be a string, got {}", crate::value::json_type_name(&other)),
        }),
    }
}

fn optional_seconds(value: &ConfigValue) -> Result<Option<f64>, StorageError> {
    match literal(value, "timeout")? {
        None => Ok(None),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(seconds) if seconds >= 0.0 => Ok(Some(seconds)),
            _ => Err(StorageError::InvalidParameter {
                name: "timeout",
                reason: format!("must be a non-negative number, got {n}"),
            }),
        },
        Some(other) => Err(StorageError::InvalidParameter {
            name: "timeout",
            reason: format!("must be a number, got {}", crate::value::json_type_name(&other)),
        }),
    }
}

/// Flatten an object parameter into string pairs for headers and query
/// strings. Non-string values are rendered as their JSON representation.
fn string_pairs(
    value: &ConfigValue,
    name: &'static str,
) -> Result<Vec<(String, String)>, StorageError> {
    match literal(value, name)? {
        None => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()),
        Some(other) => Err(StorageError::InvalidParameter {
            name,
            reason: format!("must be an object, got {}", crate::value::json_type_name(&other)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cmr_url_composition() {
        let storage = CmrQuery::new("https://cmr.earthdata.nasa.gov/search/")
            .with_path("granules")
            .with_format("UMM_JSON");
        assert_eq!(
            storage.compose_url().unwrap(),
            "https://cmr.earthdata.nasa.gov/search/granules.umm_json"
        );
    }

    #[test]
    fn test_cmr_url_without_format() {
        let storage = CmrQuery::new("https://cmr.earthdata.nasa.gov/search/").with_path("granules");
        assert_eq!(
            storage.compose_url().unwrap(),
            "https://cmr.earthdata.nasa.gov/search/granules"
        );
    }

    #[test]
    fn test_http_config_requires_url() {
        let config = json!({});
        let err = HttpRequest::from_config(config.as_object().unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "missing required argument 'url'");
    }

    #[test]
    fn test_cmr_config_rejects_direct_url() {
        let config = json!({"base_url": "https://example.com/", "url": "https://example.com/"});
        let err = CmrQuery::from_config(config.as_object().unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "unexpected argument 'url'");
    }

    #[test]
    fn test_token_resolved_from_context() {
        let mut storage = CmrQuery::new("https://example.com/")
            .with_token(ConfigValue::context("$.meta.cmr_token"));
        let snapshot = json!({"files": [], "meta": {"cmr_token": "Bearer abc"}});
        storage.resolve_context_values(&snapshot).unwrap();
        assert_eq!(
            optional_string(&storage.token, "token").unwrap(),
            Some("Bearer abc".to_string())
        );
    }

    #[test]
    fn test_invalid_method_is_rejected() {
        let spec = RequestSpec {
            url: "http://localhost/".to_string(),
            method: "NOT A METHOD".to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            json: None,
            timeout: None,
            allow_redirects: true,
        };
        let err = spec.execute().err().unwrap();
        assert!(matches!(err, StorageError::InvalidParameter { name: "method", .. }));
    }
}
