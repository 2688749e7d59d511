//! Request and response interceptors.
//!
//! Interceptors are applied to outgoing options in registration order and to
//! incoming responses in reverse order, so the first interceptor registered
//! wraps every other one. Each leg carries an error hook: once a hook fails,
//! later interceptors see the error through `request_error`/`response_error`
//! and may recover it back into a value.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{ClientError, RequestOptions, Response, Result};

/// Interceptor trait for observing and transforming traffic.
///
/// Every hook has a pass-through default, so implementors override only the
/// legs they care about.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Inspect or modify the options before the request is sent.
    async fn request(&self, options: RequestOptions) -> Result<RequestOptions> {
        Ok(options)
    }

    /// Recover from an error raised earlier on the request leg.
    async fn request_error(&self, error: ClientError) -> Result<RequestOptions> {
        Err(error)
    }

    /// Inspect or modify the decoded response.
    async fn response(&self, response: Response) -> Result<Response> {
        Ok(response)
    }

    /// Recover from an error raised by the transport, by classification, or
    /// by an interceptor that ran before this one on the response leg.
    async fn response_error(&self, error: ClientError) -> Result<Response> {
        Err(error)
    }
}

/// Shared, ordered interceptor registry.
///
/// Clones share the same registry. Changes are visible to calls started
/// afterwards; calls already in flight keep the [`ChainSnapshot`] they took.
///
/// ```
/// use keel_request::{InterceptorChain, LoggingInterceptor, RequestOptions};
///
/// # tokio_test::block_on(async {
/// let chain = InterceptorChain::new();
/// let snapshot = chain.snapshot();
/// chain.push(LoggingInterceptor::new().with_headers());
///
/// assert!(snapshot.is_empty());
/// assert_eq!(chain.len(), 1);
///
/// let options = chain
///     .snapshot()
///     .apply_to_request(Ok(RequestOptions::get("/devices")))
///     .await
///     .unwrap();
/// assert_eq!(options.url, "/devices");
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InterceptorChain {
    entries: Arc<RwLock<Vec<Arc<dyn Interceptor>>>>,
}

impl InterceptorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor.
    pub fn push<I>(&self, interceptor: I)
    where
        I: Interceptor + 'static,
    {
        self.push_arc(Arc::new(interceptor));
    }

    /// Append a shared interceptor.
    pub fn push_arc(&self, interceptor: Arc<dyn Interceptor>) {
        self.entries.write().push(interceptor);
    }

    /// Insert an interceptor at `index`, shifting later ones back.
    ///
    /// An index past the end appends.
    pub fn insert(&self, index: usize, interceptor: Arc<dyn Interceptor>) {
        let mut entries = self.entries.write();
        let index = index.min(entries.len());
        entries.insert(index, interceptor);
    }

    /// Remove the interceptor at `index`.
    pub fn remove(&self, index: usize) -> Option<Arc<dyn Interceptor>> {
        let mut entries = self.entries.write();
        (index < entries.len()).then(|| entries.remove(index))
    }

    /// Remove every interceptor.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of registered interceptors.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no interceptor is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Freeze the current sequence for one call.
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            entries: self.entries.read().clone(),
        }
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.len())
            .finish()
    }
}

/// Immutable view of the chain taken at the start of a call.
#[derive(Clone, Default)]
pub struct ChainSnapshot {
    entries: Vec<Arc<dyn Interceptor>>,
}

impl ChainSnapshot {
    /// Number of interceptors in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold the request leg in registration order.
    pub async fn apply_to_request(
        &self,
        initial: Result<RequestOptions>,
    ) -> Result<RequestOptions> {
        let mut state = initial;
        for interceptor in &self.entries {
            state = match state {
                Ok(options) => interceptor.request(options).await,
                Err(error) => interceptor.request_error(error).await,
            };
        }
        state
    }

    /// Fold the response leg in reverse registration order.
    pub async fn apply_to_response(&self, initial: Result<Response>) -> Result<Response> {
        let mut state = initial;
        for interceptor in self.entries.iter().rev() {
            state = match state {
                Ok(response) => interceptor.response(response).await,
                Err(error) => interceptor.response_error(error).await,
            };
        }
        state
    }
}

impl std::fmt::Debug for ChainSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSnapshot")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Logging interceptor that logs requests and responses.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    log_headers: bool,
}

impl LoggingInterceptor {
    /// Create a new logging interceptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable logging of headers.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn request(&self, options: RequestOptions) -> Result<RequestOptions> {
        tracing::debug!(
            method = %options.method,
            url = %options.url,
            base_url = ?options.base_url,
            "Sending HTTP request"
        );

        if self.log_headers {
            for (name, value) in &options.headers {
                tracing::trace!(header = %name, value = ?value, "Request header");
            }
        }

        Ok(options)
    }

    async fn response(&self, response: Response) -> Result<Response> {
        tracing::debug!(
            status = %response.status(),
            url = %response.url(),
            "Received HTTP response"
        );

        if self.log_headers {
            for (name, value) in response.headers() {
                tracing::trace!(header = %name, value = ?value, "Response header");
            }
        }

        Ok(response)
    }

    async fn response_error(&self, error: ClientError) -> Result<Response> {
        tracing::debug!(error = %error, "HTTP request failed");
        Err(error)
    }
}
