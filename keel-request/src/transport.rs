//! Transport collaborator.
//!
//! The pipeline hands a finalized [`TransportRequest`] to a [`Transport`] and
//! gets back status, headers and a body stream. [`ReqwestTransport`] is the
//! production implementation; tests substitute scripted transports.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use parking_lot::Mutex;
use tracing::debug;

use crate::{ClientConfig, ClientError, RequestBody, RequestOptions, Result};

/// A request ready to go on the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Fully resolved URL.
    pub url: url::Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Encoded body.
    pub body: Option<Bytes>,
    /// Request timeout.
    pub timeout: Duration,
    /// Immediate retries on connection failure or timeout.
    pub retries: u32,
    /// Verify TLS certificates.
    pub strict_ssl: bool,
    /// Let the transport decode `Content-Encoding`. Disabled for streams,
    /// which decode in the pipeline.
    pub decompress: bool,
}

impl TransportRequest {
    /// Finalize request options, filling gaps from the client configuration.
    pub fn from_options(
        options: &RequestOptions,
        config: &ClientConfig,
        decompress: bool,
    ) -> Result<Self> {
        let url = options.resolve_url()?;
        let mut headers = options.headers.clone();

        if options.json && !headers.contains_key(header::ACCEPT) {
            headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        }

        let body = match &options.body {
            None => None,
            Some(RequestBody::Json(value)) => {
                if !headers.contains_key(header::CONTENT_TYPE) {
                    headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                }
                Some(Bytes::from(serde_json::to_vec(value)?))
            }
            Some(RequestBody::Text(text)) => {
                if !headers.contains_key(header::CONTENT_TYPE) {
                    headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; charset=utf-8"),
                    );
                }
                Some(Bytes::from(text.clone()))
            }
            Some(RequestBody::Bytes(bytes)) => Some(bytes.clone()),
        };

        Ok(Self {
            method: options.method.clone(),
            url,
            headers,
            body,
            timeout: options.timeout.unwrap_or(config.timeout),
            retries: options.retries.unwrap_or(config.retries),
            strict_ssl: options.strict_ssl,
            decompress,
        })
    }
}

/// Response as returned by the transport, body not yet read.
pub struct TransportResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Final URL after redirects.
    pub url: url::Url,
    /// Body chunks.
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl TransportResponse {
    /// Create a response with an in-memory body.
    pub fn from_bytes(
        status: StatusCode,
        headers: HeaderMap,
        url: url::Url,
        body: impl Into<Bytes>,
    ) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers,
            url,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Read the whole body.
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Performs HTTP requests on behalf of the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the response head with a body stream.
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClientKey {
    decompress: bool,
    strict_ssl: bool,
}

/// Transport backed by `reqwest`.
///
/// One `reqwest::Client` is built lazily per combination of decompression and
/// TLS verification, and reused for connection pooling.
pub struct ReqwestTransport {
    connect_timeout: Duration,
    user_agent: String,
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl ReqwestTransport {
    /// Create a transport using the connection settings of `config`.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            user_agent: config.user_agent.clone(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, key: ClientKey) -> Result<reqwest::Client> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .gzip(key.decompress)
            .deflate(key.decompress)
            .brotli(key.decompress)
            .danger_accept_invalid_certs(!key.strict_ssl)
            .build()
            .map_err(|e| ClientError::ClientBuild(e.to_string()))?;

        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn execute_once(
        &self,
        client: &reqwest::Client,
        request: &TransportRequest,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout);

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder.send().await
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse> {
        let client = self.client_for(ClientKey {
            decompress: request.decompress,
            strict_ssl: request.strict_ssl,
        })?;

        let mut attempt = 0;
        let response = loop {
            match self.execute_once(&client, &request).await {
                Ok(response) => break response,
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < request.retries => {
                    attempt += 1;
                    debug!(
                        attempt,
                        retries = request.retries,
                        error = %e,
                        "Retrying request after transport failure"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .base_url("https://api.example.com")
            .retries(2)
            .build()
    }

    #[test]
    fn test_json_body_sets_headers() {
        let options = RequestOptions::post("/devices").json(&json!({ "name": "pi" }));
        let request = TransportRequest::from_options(&options, &config(), true).unwrap();

        assert_eq!(request.url.as_str(), "https://api.example.com/devices");
        assert_eq!(request.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(request.headers[header::ACCEPT], "application/json");
        assert_eq!(request.body.as_deref(), Some(&br#"{"name":"pi"}"#[..]));
        assert_eq!(request.retries, 2);
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert!(request.decompress);
    }

    #[test]
    fn test_text_body_keeps_explicit_content_type() {
        let options = RequestOptions::put("/notes")
            .header("content-type", "text/markdown")
            .text("# hi");
        let request = TransportRequest::from_options(&options, &config(), false).unwrap();

        assert_eq!(request.headers[header::CONTENT_TYPE], "text/markdown");
        assert_eq!(request.body.as_deref(), Some(&b"# hi"[..]));
    }

    #[test]
    fn test_option_overrides_win() {
        let mut options = RequestOptions::get("https://other.example.com/x")
            .retries(5)
            .timeout(Duration::from_secs(1));
        options.json = false;
        let request = TransportRequest::from_options(&options, &config(), true).unwrap();

        assert_eq!(request.url.as_str(), "https://other.example.com/x");
        assert_eq!(request.retries, 5);
        assert_eq!(request.timeout, Duration::from_secs(1));
        assert!(!request.headers.contains_key(header::ACCEPT));
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_response_body() {
        let response = TransportResponse::from_bytes(
            StatusCode::OK,
            HeaderMap::new(),
            url::Url::parse("https://api.example.com/").unwrap(),
            "payload",
        );
        assert_eq!(&response.into_bytes().await.unwrap()[..], b"payload");
    }

    #[test]
    fn test_clients_are_cached_per_key() {
        let transport = ReqwestTransport::new(&config());
        let key = ClientKey {
            decompress: false,
            strict_ssl: true,
        };
        transport.client_for(key).unwrap();
        transport.client_for(key).unwrap();
        transport
            .client_for(ClientKey {
                decompress: true,
                strict_ssl: true,
            })
            .unwrap();
        assert_eq!(transport.clients.lock().len(), 2);
    }
}
