//! Request pipeline error types.

use keel_compression::CompressionError;
use thiserror::Error;

/// Result type for request pipeline operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the request pipeline.
///
/// Transport failures are passed through as [`ClientError::Http`] without
/// reclassification; status-code failures become [`ClientError::Request`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The refresh probe was rejected as unauthorized. The session token has
    /// been removed from the store; the caller must authenticate again.
    #[error("The session token has expired")]
    ExpiredToken {
        /// The token that was removed, if the store still held one.
        token: Option<String>,
    },

    /// The server answered with a status classified as an error.
    #[error("Request error: {message}")]
    Request {
        /// HTTP status code.
        status_code: u16,
        /// Message derived from the response body.
        message: String,
        /// Failure that happened while reading the error body, if any.
        #[source]
        source: Option<Box<ClientError>>,
    },

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The option bag failed validation.
    #[error("Invalid request options: {0}")]
    InvalidOptions(String),

    /// A header name or value could not be encoded.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Raised by an interceptor hook.
    #[error("Interceptor error: {0}")]
    Interceptor(String),

    /// The token store collaborator failed.
    #[error("Token store error: {0}")]
    TokenStore(String),

    /// The server returned a body the pipeline could not use.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Failed to build the underlying HTTP client.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// Decoding a compressed body failed.
    #[error("Decompression error: {0}")]
    Decompression(#[from] CompressionError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Build a status-code error without a cause.
    pub fn request(status_code: u16, message: impl Into<String>) -> Self {
        Self::Request {
            status_code,
            message: message.into(),
            source: None,
        }
    }

    /// Get the HTTP status code if this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Request { status_code, .. } => Some(*status_code),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if this is a 401 request error.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Request { status_code: 401, .. })
    }

    /// Check if the session token was invalidated.
    pub fn is_expired_token(&self) -> bool {
        matches!(self, Self::ExpiredToken { .. })
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_connect())
    }
}
