//! Session tokens: the store collaborator and the refresh gate.
//!
//! The [`TokenGate`] guards every outgoing request. When the store reports
//! that the current token should be refreshed, the gate runs a refresh probe
//! (an identity check sent with `refresh_token` disabled) and persists the
//! token it returns. A 401 from the probe means the session is gone: the
//! token is removed and the call fails with [`ClientError::ExpiredToken`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{ClientError, RefreshPolicy, Response, Result};

/// Path of the identity-check endpoint used as the refresh probe.
pub const WHOAMI_PATH: &str = "/whoami";

/// Persistence for the session token.
///
/// The store owns the refresh criterion; the gate only asks.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the current token.
    async fn get(&self) -> Result<Option<String>>;

    /// Persist a token, replacing the current one.
    async fn set(&self, token: String) -> Result<()>;

    /// Forget the current token.
    async fn remove(&self) -> Result<()>;

    /// Whether `token` should be renewed before the next request.
    async fn should_refresh(&self, token: Option<&str>) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredToken {
    value: String,
    stored_at: Instant,
}

/// In-memory token store.
///
/// A token is due for refresh once it is older than `refresh_after`
/// (one hour by default). Without a token there is nothing to refresh.
///
/// ```
/// use keel_request::{MemoryTokenStore, TokenStore};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let store = MemoryTokenStore::with_token("abc").refresh_after(Duration::ZERO);
/// assert!(store.should_refresh(Some("abc")).await.unwrap());
///
/// store.remove().await.unwrap();
/// assert_eq!(store.get().await.unwrap(), None);
/// # });
/// ```
#[derive(Debug)]
pub struct MemoryTokenStore {
    state: RwLock<Option<StoredToken>>,
    refresh_after: Duration,
}

impl MemoryTokenStore {
    /// Default token age after which a refresh is requested.
    pub const DEFAULT_REFRESH_AFTER: Duration = Duration::from_secs(60 * 60);

    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            refresh_after: Self::DEFAULT_REFRESH_AFTER,
        }
    }

    /// Create a store holding `token`, stored now.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.replace(token.into());
        store
    }

    /// Set the refresh age.
    pub fn refresh_after(mut self, age: Duration) -> Self {
        self.refresh_after = age;
        self
    }

    /// Age of the current token.
    pub fn age(&self) -> Option<Duration> {
        self.state.read().as_ref().map(|t| t.stored_at.elapsed())
    }

    fn replace(&self, value: String) {
        *self.state.write() = Some(StoredToken {
            value,
            stored_at: Instant::now(),
        });
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Result<Option<String>> {
        Ok(self.state.read().as_ref().map(|t| t.value.clone()))
    }

    async fn set(&self, token: String) -> Result<()> {
        self.replace(token);
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.state.write().take();
        Ok(())
    }

    async fn should_refresh(&self, token: Option<&str>) -> Result<bool> {
        if token.is_none() {
            return Ok(false);
        }
        Ok(self.age().is_some_and(|age| age >= self.refresh_after))
    }
}

/// What the gate did for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The request opted out of the gate.
    Disabled,
    /// The store reported the token as current.
    Fresh,
    /// A probe ran and a renewed token was stored.
    Refreshed,
}

/// Decides per request whether the token must be refreshed, and refreshes it.
pub struct TokenGate {
    store: Arc<dyn TokenStore>,
    policy: RefreshPolicy,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TokenGate {
    /// Create a gate over `store`.
    pub fn new(store: Arc<dyn TokenStore>, policy: RefreshPolicy) -> Self {
        Self {
            store,
            policy,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The token store.
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// The refresh coordination policy.
    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Refresh the token through `probe` if the store asks for it.
    ///
    /// `probe` must send the identity check with the gate disabled, or it
    /// would recurse into this method.
    pub async fn ensure_fresh<F, Fut>(&self, enabled: bool, probe: F) -> Result<RefreshOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        if !enabled {
            return Ok(RefreshOutcome::Disabled);
        }

        match self.policy {
            RefreshPolicy::Concurrent => self.refresh_with(probe).await,
            RefreshPolicy::SingleFlight => {
                let _guard = self.refresh_lock.lock().await;
                self.refresh_with(probe).await
            }
        }
    }

    async fn refresh_with<F, Fut>(&self, probe: F) -> Result<RefreshOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let current = self.store.get().await?;
        if !self.store.should_refresh(current.as_deref()).await? {
            return Ok(RefreshOutcome::Fresh);
        }

        debug!("Session token is due for refresh, probing identity");

        match probe().await {
            Ok(response) => {
                let token = token_from_body(response.body())?;
                self.store.set(token).await?;
                debug!("Session token refreshed");
                Ok(RefreshOutcome::Refreshed)
            }
            Err(e) if e.is_unauthorized() => {
                let token = self.store.get().await?;
                self.store.remove().await?;
                warn!("Refresh probe was rejected, session token removed");
                Err(ClientError::ExpiredToken { token })
            }
            Err(e) => Err(e),
        }
    }

    /// `Authorization` header value for the current token, if any.
    pub async fn authorization_header(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get()
            .await?
            .filter(|token| !token.is_empty())
            .map(|token| format!("Bearer {token}")))
    }
}

impl std::fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGate")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn token_from_body(body: &Value) -> Result<String> {
    match body.as_str().map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(ClientError::MalformedResponse(
            "identity check did not return a token".to_string(),
        )),
    }
}
