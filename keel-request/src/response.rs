//! Decoded HTTP response.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Result;

/// Fallback error message for bodies that carry nothing useful.
pub const DEFAULT_ERROR_MESSAGE: &str = "The request was unsuccessful";

/// HTTP response with a decoded body.
///
/// The body is decoded before interceptors see the response: JSON content
/// becomes a JSON value, anything else a JSON string, and an empty body
/// `null`. Interceptors may replace it.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: url::Url,
    body: Value,
}

impl Response {
    /// Create a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, url: url::Url, body: Value) -> Self {
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    /// Create a response by decoding raw body bytes against the headers.
    pub fn decode(status: StatusCode, headers: HeaderMap, url: url::Url, raw: &Bytes) -> Self {
        let body = decode_body(&headers, raw);
        Self::new(status, headers, url, body)
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the status code as a number.
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the content type if available.
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// Get the response URL.
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Get the decoded body.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Get the decoded body for modification.
    pub fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    /// Replace the decoded body.
    pub fn set_body(&mut self, body: Value) {
        self.body = body;
    }

    /// Consume the response and return the body.
    pub fn into_body(self) -> Value {
        self.body
    }

    /// Get the body as text if it decoded to a string.
    pub fn text(&self) -> Option<&str> {
        self.body.as_str()
    }

    /// Deserialize the body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Message describing an error response, derived from the body.
    pub fn error_message(&self) -> String {
        error_message_from_body(&self.body)
    }
}

/// Decode a raw body according to its `Content-Type`.
pub(crate) fn decode_body(headers: &HeaderMap, raw: &[u8]) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }

    let is_json = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));

    if is_json {
        match serde_json::from_slice(raw) {
            Ok(value) => return value,
            Err(e) => {
                tracing::warn!(error = %e, "Response declared JSON but did not parse; using text");
            }
        }
    }

    Value::String(String::from_utf8_lossy(raw).into_owned())
}

/// Derive a human-readable error message from a decoded body.
pub(crate) fn error_message_from_body(body: &Value) -> String {
    match body {
        Value::Null => DEFAULT_ERROR_MESSAGE.to_string(),
        Value::String(text) if text.trim().is_empty() => DEFAULT_ERROR_MESSAGE.to_string(),
        Value::String(text) => text.clone(),
        Value::Object(map) => {
            if let Some(text) = map
                .get("error")
                .and_then(|e| e.get("text"))
                .and_then(Value::as_str)
            {
                return text.to_string();
            }
            if let Some(message) = map.get("message").and_then(Value::as_str) {
                return message.to_string();
            }
            if let Some(error) = map.get("error").and_then(Value::as_str) {
                return error.to_string();
            }
            if map.is_empty() {
                return DEFAULT_ERROR_MESSAGE.to_string();
            }
            body.to_string()
        }
        other => other.to_string(),
    }
}
