//! Rate-limited HTTP fetching

use bytes::Bytes;
use serde::de::DeserializeOwned;

pub mod http;
pub mod pagination;
pub mod rate_limit;
pub mod retry_formatter;
pub mod shared_resources;
pub mod target;

pub use http::RateLimitedFetcher;
pub use rate_limit::{AdaptiveDelay, DelayConfig, DelayState};
pub use retry_formatter::RetryErrorType;
pub use target::{FetchTarget, HttpMethod, UrlTemplate};

/// Fetcher errors
///
/// Only returned for programming errors; remote failures are reported through
/// [`FetchAttemptResult`].
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Target URL or descriptor is malformed
    #[error("invalid fetch target: {0}")]
    InvalidTarget(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    ClientBuild(String),

    /// Payload could not be decoded
    #[error("parse error: {0}")]
    ParseError(String),

    /// Pagination did not terminate
    #[error("pagination exceeded {0} pages")]
    PaginationLimit(usize),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Terminal reason a logical fetch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// Non-retryable 4xx response (anything except 429)
    ClientError {
        /// HTTP status
        status: u16,
    },
    /// Retry budget spent on transient failures
    ExhaustedRetries {
        /// Classification of the last failed attempt
        last_error: RetryErrorType,
    },
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientError { status } => write!(f, "client error {status}"),
            Self::ExhaustedRetries { last_error } => {
                write!(f, "retries exhausted ({})", last_error.description())
            }
        }
    }
}

/// Outcome of one logical fetch, including all retries.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAttemptResult {
    /// Whether a usable payload was obtained
    pub succeeded: bool,
    /// Status of the last response, absent on network failure
    pub status_code: Option<u16>,
    /// Retries spent after the first attempt
    pub retries_used: u32,
    /// Response body, present only on success
    pub payload: Option<Bytes>,
    /// Why the fetch failed, present only on failure
    pub failure: Option<FetchFailure>,
}

impl FetchAttemptResult {
    /// Successful fetch
    pub fn success(status_code: u16, retries_used: u32, payload: Bytes) -> Self {
        Self {
            succeeded: true,
            status_code: Some(status_code),
            retries_used,
            payload: Some(payload),
            failure: None,
        }
    }

    /// Failed fetch
    pub fn failed(status_code: Option<u16>, retries_used: u32, failure: FetchFailure) -> Self {
        Self {
            succeeded: false,
            status_code,
            retries_used,
            payload: None,
            failure: Some(failure),
        }
    }

    /// Whether the fetch ended on a non-retryable 4xx
    pub fn is_client_error(&self) -> bool {
        matches!(self.failure, Some(FetchFailure::ClientError { .. }))
    }

    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> FetcherResult<T> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| FetcherError::ParseError("fetch produced no payload".to_string()))?;
        serde_json::from_slice(payload)
            .map_err(|e| FetcherError::ParseError(format!("invalid JSON payload: {e}")))
    }
}
