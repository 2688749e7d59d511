//! Request options.
//!
//! [`RequestOptions`] is the explicit form of the option bag every pipeline
//! stage reads and mutates: defaults are applied once, then the token gate,
//! the interceptor chain, and finally the transport see the same value.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClientError, Result};

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON when the request is sent.
    Json(Value),
    /// Sent as `text/plain`.
    Text(String),
    /// Sent as-is.
    Bytes(Bytes),
}

/// Options for one call through the pipeline.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method. Defaults to `GET`.
    pub method: Method,
    /// Absolute URL, or a path resolved against `base_url`.
    pub url: String,
    /// Base URL. Dropped when `url` carries its own scheme.
    pub base_url: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<RequestBody>,
    /// API key appended to the query string as `apikey`.
    pub api_key: Option<String>,
    /// Negotiate JSON bodies (`Accept`/`Content-Type`). Defaults to `true`.
    pub json: bool,
    /// Verify TLS certificates. Defaults to `true`.
    pub strict_ssl: bool,
    /// Run the token gate before sending. Defaults to `true`.
    pub refresh_token: bool,
    /// Retry count for the transport. `None` takes the client default.
    pub retries: Option<u32>,
    /// Request timeout. `None` takes the client default.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            url: String::new(),
            base_url: None,
            headers: HeaderMap::new(),
            body: None,
            api_key: None,
            json: true,
            strict_ssl: true,
            refresh_token: true,
            retries: None,
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// Create options for the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create `GET` options.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create `POST` options.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Create `PUT` options.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Create `PATCH` options.
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// Create `DELETE` options.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Set the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a header. Invalid names or values are skipped with a warning.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let Err(e) = self.insert_header(name.as_ref(), value.as_ref()) {
            tracing::warn!(error = %e, "Skipping invalid request header");
        }
        self
    }

    /// Insert a header, replacing any previous value.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::try_from(name)
            .map_err(|e| ClientError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| ClientError::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Set a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = Some(RequestBody::Json(value)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize JSON body");
            }
        }
        self
    }

    /// Set a text body.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(text.into()));
        self
    }

    /// Set a raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    /// Set the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Enable or disable the token gate for this call.
    pub fn refresh_token(mut self, enable: bool) -> Self {
        self.refresh_token = enable;
        self
    }

    /// Set the retry count.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable TLS certificate verification.
    pub fn strict_ssl(mut self, enable: bool) -> Self {
        self.strict_ssl = enable;
        self
    }

    /// Whether `url` already names a scheme, making `base_url` irrelevant.
    pub fn has_protocol(&self) -> bool {
        url::Url::parse(&self.url).is_ok()
    }

    /// Append `apikey=<key>` to the URL's query string.
    pub fn append_api_key(&mut self, api_key: &str) {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let encoded: String = url::form_urlencoded::byte_serialize(api_key.as_bytes()).collect();
        self.url.push(separator);
        self.url.push_str("apikey=");
        self.url.push_str(&encoded);
    }

    /// Resolve the final request URL.
    pub fn resolve_url(&self) -> Result<url::Url> {
        let full = match (&self.base_url, self.has_protocol()) {
            (Some(base), false) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.url.trim_start_matches('/')
            ),
            _ => self.url.clone(),
        };

        url::Url::parse(&full).map_err(|e| ClientError::InvalidUrl(format!("{full}: {e}")))
    }

    /// Build options from a dynamic option bag.
    ///
    /// Recognized keys: `method`, `url` (or `uri`), `baseUrl`, `headers`,
    /// `body` (or `data`), `apiKey`, `json`, `strictSSL`, `refreshToken`,
    /// `retries`, `timeout` (milliseconds). Any other key is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawOptions = serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidOptions(e.to_string()))?;
        raw.try_into()
    }
}

/// Wire shape of the option bag.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawOptions {
    method: Option<String>,
    #[serde(alias = "uri")]
    url: Option<String>,
    base_url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(alias = "data")]
    body: Option<Value>,
    api_key: Option<String>,
    json: Option<bool>,
    #[serde(rename = "strictSSL")]
    strict_ssl: Option<bool>,
    refresh_token: Option<bool>,
    retries: Option<u32>,
    timeout: Option<u64>,
}

impl TryFrom<RawOptions> for RequestOptions {
    type Error = ClientError;

    fn try_from(raw: RawOptions) -> Result<Self> {
        let defaults = RequestOptions::default();

        let url = raw
            .url
            .ok_or_else(|| ClientError::InvalidOptions("missing `url`".to_string()))?;

        let method = match raw.method {
            Some(method) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| ClientError::InvalidOptions(format!("invalid method `{method}`")))?,
            None => defaults.method,
        };

        let json = raw.json.unwrap_or(defaults.json);
        let body = raw.body.map(|body| match body {
            Value::String(text) if !json => RequestBody::Text(text),
            other => RequestBody::Json(other),
        });

        let mut options = RequestOptions {
            method,
            url,
            base_url: raw.base_url,
            headers: HeaderMap::new(),
            body,
            api_key: raw.api_key,
            json,
            strict_ssl: raw.strict_ssl.unwrap_or(defaults.strict_ssl),
            refresh_token: raw.refresh_token.unwrap_or(defaults.refresh_token),
            retries: raw.retries,
            timeout: raw.timeout.map(Duration::from_millis),
        };

        for (name, value) in &raw.headers {
            options.insert_header(name, value)?;
        }

        Ok(options)
    }
}
