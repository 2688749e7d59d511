//! Request pipeline.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use keel_compression::{ACCEPT_ENCODING, ContentEncoding};
use tracing::{debug, info};

use crate::response::{DEFAULT_ERROR_MESSAGE, decode_body, error_message_from_body};
use crate::stream::{DownloadStream, ResponseLengthInfo, StreamPipeline};
use crate::token::{MemoryTokenStore, TokenGate, TokenStore, WHOAMI_PATH};
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
use crate::{ClientConfig, ClientError, InterceptorChain, RequestOptions, Response, Result};

/// API client: token gate, interceptor chain and transport behind one pipeline.
///
/// Cloning is cheap; clones share the token store and the interceptor registry.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    gate: Arc<TokenGate>,
    interceptors: InterceptorChain,
}

impl Client {
    /// Create a client with an in-memory token store and the `reqwest` transport.
    pub fn new(config: ClientConfig) -> Self {
        let transport = Arc::new(ReqwestTransport::new(&config));
        let store = Arc::new(MemoryTokenStore::new());
        Self::from_parts(config, transport, store)
    }

    /// Create a client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    fn from_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let gate = TokenGate::new(store, config.refresh_policy);
        Self {
            config: Arc::new(config),
            transport,
            gate: Arc::new(gate),
            interceptors: InterceptorChain::new(),
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The interceptor registry. Changes apply to calls started afterwards.
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    /// The token store.
    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        self.gate.store()
    }

    /// Send a `GET` request.
    pub async fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.send(RequestOptions::get(url)).await
    }

    /// Send a request and decode the response.
    ///
    /// Status codes classified as errors become [`ClientError::Request`],
    /// which response interceptors may still recover.
    pub fn send(&self, options: RequestOptions) -> BoxFuture<'_, Result<Response>> {
        async move {
            let chain = self.interceptors.snapshot();

            let prepared = self.prepare(options).await;
            let outcome = match chain.apply_to_request(prepared).await {
                Ok(options) => self.dispatch(options).await,
                Err(e) => Err(e),
            };

            chain.apply_to_response(outcome).await
        }
        .boxed()
    }

    /// Send a request and stream the decoded body with progress.
    ///
    /// The request leg of the interceptor chain runs as for [`Client::send`].
    /// Error statuses drain the body to build the error message.
    pub async fn stream(&self, options: RequestOptions) -> Result<DownloadStream> {
        let chain = self.interceptors.snapshot();

        let prepared = self.prepare(options).await;
        let mut options = chain.apply_to_request(prepared).await?;
        options.headers.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static(ACCEPT_ENCODING),
        );

        let request = TransportRequest::from_options(&options, &self.config, false)?;
        debug!(method = %request.method, url = %request.url, "Streaming request");

        let TransportResponse {
            status,
            headers,
            url,
            body,
        } = self.transport.perform(request).await?;

        let lengths = ResponseLengthInfo::from_headers(&headers);
        let encoding = ContentEncoding::from_optional_header(
            headers
                .get(header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );
        let pipeline = StreamPipeline::new(body, encoding, lengths, self.config.progress_interval)?;

        if self.config.is_error_status(status.as_u16()) {
            return Err(self.drain_error(&options, status, &headers, pipeline).await);
        }

        Ok(DownloadStream::new(status, headers, url, pipeline))
    }

    /// Apply defaults, run the token gate, and attach credentials.
    async fn prepare(&self, mut options: RequestOptions) -> Result<RequestOptions> {
        if options.base_url.is_none() {
            options.base_url = self.config.base_url.clone();
        }
        options.retries = options.retries.or(Some(self.config.retries));
        options.timeout = options.timeout.or(Some(self.config.timeout));

        let probe_base = options.base_url.clone();
        if options.has_protocol() {
            options.base_url = None;
        }

        self.gate
            .ensure_fresh(options.refresh_token, || self.probe(probe_base))
            .await?;

        if let Some(authorization) = self.gate.authorization_header().await? {
            options.insert_header(header::AUTHORIZATION.as_str(), &authorization)?;
        }
        if let Some(api_key) = options.api_key.clone() {
            options.append_api_key(&api_key);
        }

        Ok(options)
    }

    /// Identity check used to refresh the token. Never gated itself.
    fn probe(&self, base_url: Option<String>) -> BoxFuture<'_, Result<Response>> {
        let mut options = RequestOptions::get(WHOAMI_PATH).refresh_token(false);
        options.base_url = base_url;
        self.send(options)
    }

    async fn dispatch(&self, options: RequestOptions) -> Result<Response> {
        let request = TransportRequest::from_options(&options, &self.config, true)?;
        debug!(method = %request.method, url = %request.url, "Sending request");

        let response = self.transport.perform(request).await?;
        let status = response.status;
        let headers = response.headers.clone();
        let url = response.url.clone();
        let raw = response.into_bytes().await?;

        let response = Response::decode(status, headers, url, &raw);
        self.classify(&options, response)
    }

    fn classify(&self, options: &RequestOptions, response: Response) -> Result<Response> {
        if !self.config.is_error_status(response.status_code()) {
            return Ok(response);
        }

        let message = response.error_message();
        if self.config.debug_requests {
            info!(
                method = %options.method,
                url = %response.url(),
                status = response.status_code(),
                body = %response.body(),
                "Request failed"
            );
        }

        Err(ClientError::request(response.status_code(), message))
    }

    async fn drain_error(
        &self,
        options: &RequestOptions,
        status: StatusCode,
        headers: &HeaderMap,
        pipeline: StreamPipeline,
    ) -> ClientError {
        match pipeline.collect_bytes().await {
            Ok(raw) => {
                let body = decode_body(headers, &raw);
                if self.config.debug_requests {
                    info!(
                        method = %options.method,
                        url = %options.url,
                        status = status.as_u16(),
                        body = %body,
                        "Streamed request failed"
                    );
                }
                ClientError::request(status.as_u16(), error_message_from_body(&body))
            }
            Err(e) => {
                debug!(error = %e, "Failed to drain error body");
                ClientError::Request {
                    status_code: status.as_u16(),
                    message: DEFAULT_ERROR_MESSAGE.to_string(),
                    source: Some(Box::new(e)),
                }
            }
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Arc<dyn TokenStore>>,
}

impl ClientBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom token store.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new(&self.config)));
        let store = self
            .token_store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        Client::from_parts(self.config, transport, store)
    }
}
