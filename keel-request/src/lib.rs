//! # Keel Request
//!
//! The request-dispatch core of the Keel API client: authenticated requests
//! with transparent session-token refresh, an ordered interceptor chain, and
//! streamed downloads that decompress and report progress at the same time.
//!
//! ## Features
//!
//! - **Token refresh**: a stale token is renewed through an identity check
//!   before the request goes out; a rejected check expires the session
//! - **Interceptors**: request hooks run in registration order, response hooks
//!   in reverse, each with an error-recovery counterpart
//! - **Streaming**: gzip/deflate bodies are decoded incrementally while
//!   progress is measured against the length the server actually declared
//! - **Error classification**: status codes at or above 400 become
//!   [`ClientError::Request`] with a message taken from the body
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keel_request::{Client, ClientConfig, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .build();
//!     let client = Client::new(config);
//!
//!     let response = client
//!         .send(RequestOptions::get("/devices").api_key("secret"))
//!         .await?;
//!
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming with Progress
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use keel_request::{Client, ClientConfig, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::default());
//!
//!     let mut download = client
//!         .stream(RequestOptions::get("https://files.example.com/image.img"))
//!         .await?;
//!
//!     if let Some(mut progress) = download.take_progress() {
//!         tokio::spawn(async move {
//!             while let Some(state) = progress.recv().await {
//!                 println!("{:?}% ({} bytes)", state.percentage, state.received);
//!             }
//!         });
//!     }
//!
//!     while let Some(chunk) = download.next().await {
//!         let _bytes = chunk?;
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod interceptor;
mod options;
mod progress;
mod response;
mod stream;
mod token;
mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder, RefreshPolicy};
pub use error::{ClientError, Result};
pub use interceptor::{ChainSnapshot, Interceptor, InterceptorChain, LoggingInterceptor};
pub use options::{RequestBody, RequestOptions};
pub use progress::{DEFAULT_PROGRESS_INTERVAL, ProgressMeter, ProgressState};
pub use response::{DEFAULT_ERROR_MESSAGE, Response};
pub use stream::{
    DownloadStream, ResponseLengthInfo, Stage, StagePlan, StreamPipeline, TRANSFER_LENGTH_HEADER,
    plan_stages,
};
pub use token::{MemoryTokenStore, RefreshOutcome, TokenGate, TokenStore, WHOAMI_PATH};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use keel_compression::ContentEncoding;
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use keel_request::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::{Client, ClientBuilder};
    pub use crate::config::{ClientConfig, RefreshPolicy};
    pub use crate::error::{ClientError, Result};
    pub use crate::interceptor::{Interceptor, InterceptorChain, LoggingInterceptor};
    pub use crate::options::{RequestBody, RequestOptions};
    pub use crate::progress::ProgressState;
    pub use crate::response::Response;
    pub use crate::stream::DownloadStream;
    pub use crate::token::{MemoryTokenStore, TokenStore};
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
}
