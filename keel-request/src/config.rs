//! Client configuration.

use std::env;
use std::time::Duration;

use crate::{ClientError, Result};

/// How concurrent calls coordinate a token refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Every call that finds a stale token issues its own probe. The last
    /// write to the token store wins.
    #[default]
    Concurrent,
    /// One probe at a time. Calls queued behind an in-flight refresh re-check
    /// the store and skip the probe when it is no longer needed.
    SingleFlight,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL used when a request does not supply its own.
    pub base_url: Option<String>,
    /// Retry count handed to the transport with every request.
    pub retries: u32,
    /// Default request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// User agent string.
    pub user_agent: String,
    /// Log request and response details for every failed request.
    pub debug_requests: bool,
    /// Status codes at or above this value are request errors.
    pub error_status_floor: u16,
    /// Minimum spacing between progress samples.
    pub progress_interval: Duration,
    /// Token refresh coordination.
    pub refresh_policy: RefreshPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            retries: 0,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("keel-request/{}", env!("CARGO_PKG_VERSION")),
            debug_requests: false,
            error_status_floor: 400,
            progress_interval: Duration::from_millis(500),
            refresh_policy: RefreshPolicy::Concurrent,
        }
    }
}

impl ClientConfig {
    /// Environment variable prefix read by [`ClientConfig::from_env`].
    pub const ENV_PREFIX: &'static str = "KEEL";

    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Load configuration from `KEEL_*` environment variables.
    ///
    /// Recognized: `KEEL_BASE_URL`, `KEEL_RETRIES`, `KEEL_TIMEOUT_MS`,
    /// `KEEL_DEBUG`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(format!("{}_{}", Self::ENV_PREFIX, key)).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base_url) = lookup("BASE_URL") {
            config.base_url = Some(base_url);
        }
        if let Some(retries) = lookup("RETRIES") {
            config.retries = retries.trim().parse().map_err(|_| {
                ClientError::InvalidOptions(format!("KEEL_RETRIES is not a count: {retries}"))
            })?;
        }
        if let Some(timeout) = lookup("TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                ClientError::InvalidOptions(format!("KEEL_TIMEOUT_MS is not a number: {timeout}"))
            })?;
            config.timeout = Duration::from_millis(millis);
        }
        if let Some(debug) = lookup("DEBUG") {
            config.debug_requests = matches!(
                debug.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        Ok(config)
    }

    /// Whether a status code is classified as a request error.
    pub fn is_error_status(&self, status: u16) -> bool {
        status >= self.error_status_floor
    }
}

/// Builder for client configuration.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL for requests that do not supply one.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the retry count passed to the transport.
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable logging of failed requests.
    pub fn debug_requests(mut self, enable: bool) -> Self {
        self.config.debug_requests = enable;
        self
    }

    /// Set the lowest status code treated as a request error.
    pub fn error_status_floor(mut self, floor: u16) -> Self {
        self.config.error_status_floor = floor;
        self
    }

    /// Set the progress sampling interval.
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Set the token refresh policy.
    pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.config.refresh_policy = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
