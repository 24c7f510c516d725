//! Shared resources for all fetcher instances
//!
//! Delay state must be shared by everything that talks to the same host:
//! if each worker had its own limiter, a 429 seen by one worker would not
//! slow down the others. [`HostLimiterRegistry`] hands out one
//! [`AdaptiveDelay`] per host, and the process-wide registry plus HTTP client
//! live here.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::rate_limit::{AdaptiveDelay, DelayConfig};
use super::{FetcherError, FetcherResult};

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("manga-harvester/", env!("CARGO_PKG_VERSION"));

/// Global HTTP client shared by all fetcher instances
///
/// Configured with explicit timeouts to prevent indefinite hangs:
/// - Connect timeout: 10 seconds
/// - Request timeout: 30 seconds
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    Arc::new(build_http_client().unwrap_or_else(|e| {
        panic!("FATAL: {e}. Check system TLS configuration.");
    }))
});

/// Process-wide limiter registry
pub static GLOBAL_HOST_LIMITERS: Lazy<Arc<HostLimiterRegistry>> =
    Lazy::new(|| Arc::new(HostLimiterRegistry::new()));

/// Build a client with the standard timeouts
pub fn build_http_client() -> FetcherResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .gzip(true)
        .build()
        .map_err(|e| FetcherError::ClientBuild(format!("Failed to build HTTP client: {e}")))
}

/// Get the global HTTP client
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}

/// Get the global limiter registry
pub fn global_host_limiters() -> Arc<HostLimiterRegistry> {
    GLOBAL_HOST_LIMITERS.clone()
}

/// One shared [`AdaptiveDelay`] per host.
#[derive(Debug, Default)]
pub struct HostLimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<AdaptiveDelay>>>,
}

impl HostLimiterRegistry {
    /// Empty registry (tests use their own to stay isolated)
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter for `host`, created with `config` on first use.
    ///
    /// Later callers get the existing limiter; their config is ignored.
    pub fn limiter_for(&self, host: &str, config: DelayConfig) -> Arc<AdaptiveDelay> {
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        limiters
            .entry(host.to_string())
            .or_insert_with(|| {
                debug!(host = host, ?config, "Creating host limiter");
                Arc::new(AdaptiveDelay::new(host, config))
            })
            .clone()
    }

    /// Number of hosts with a limiter
    pub fn len(&self) -> usize {
        self.limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether no limiter has been created yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
