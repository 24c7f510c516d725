//! Attempt classification and retry log formatting.
//!
//! Every failed attempt made by [`super::http::RateLimitedFetcher`] is mapped
//! to a [`RetryErrorType`], which decides whether the attempt is retried and
//! how it is described in logs and final failure summaries.

use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// A 2xx body that is really a captcha or "unusual traffic" page
    BlockPage,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400 bad request (often an oversized id batch)
    InvalidRequest,
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::BlockPage => "block page detected",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(_) => "authentication failed",
            Self::ClientError(code) => match code {
                404 => "resource not found",
                410 => "resource gone",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Remediation hint attached to final failure summaries.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection or raise the request timeout",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Raise --min-delay-ms or lower --concurrency for this source",
            Self::BlockPage => "The site is serving a captcha; pause the crawl and retry later",
            Self::ServerError(_) => "The source may be having issues, try again later",
            Self::InvalidRequest => "Check the URL template; for chunked phases lower the batch size",
            Self::AuthFailed(_) => "Verify credentials and access permissions for this endpoint",
            Self::ClientError(_) => "The item may no longer exist upstream",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the fetcher should back off and try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RetryErrorType::InvalidRequest
                | RetryErrorType::AuthFailed(_)
                | RetryErrorType::ClientError(_)
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts (first try plus retries)
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Delay slept before the next attempt
    pub backoff_duration: Duration,
    /// Request label, usually the work item id
    pub label: String,
    /// Original error message for details
    pub error_message: String,
    /// URL that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Convenience constructor used throughout the retry logic.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        label: impl Into<String>,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            label: label.into(),
            error_message: error_message.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Standard retry line with attempt counters.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.2} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_label(&mut message, &self.label);
        message
    }

    /// Line logged when a retried request finally succeeds.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded",
            self.attempt, self.max_attempts
        );
        append_label(&mut message, &self.label);
        message
    }

    /// Multi-line summary after the retry budget is spent.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "[FAILED] Request failed after {} attempts",
            self.max_attempts
        ));
        lines.push(format!("  Last error: {}", self.error_message));
        let label = if self.label.is_empty() {
            "unknown"
        } else {
            &self.label
        };
        lines.push(format!("  Item: {label}"));
        lines.push(format!("  Endpoint: {}", self.endpoint));
        lines.push("  Suggestions:".to_string());
        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    /// Suggestions tailored to the current context.
    pub fn format_suggestions(&self) -> Vec<String> {
        vec![
            self.error_type.suggestion().to_string(),
            format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts.saturating_sub(1)
            ),
        ]
    }
}

/// Classify an attempt from its HTTP status or transport error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        match status.as_u16() {
            400 => return RetryErrorType::InvalidRequest,
            401 | 403 => return RetryErrorType::AuthFailed(status.as_u16()),
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }

        if status.is_server_error() {
            return RetryErrorType::ServerError(status.as_u16());
        }

        if status.is_client_error() {
            return RetryErrorType::ClientError(status.as_u16());
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
    }

    RetryErrorType::NetworkGeneric
}

/// Whether a successful body is actually a block page.
pub fn looks_like_block_page(body: &[u8], markers: &[String]) -> bool {
    if markers.is_empty() {
        return false;
    }
    let text = String::from_utf8_lossy(body);
    markers.iter().any(|marker| text.contains(marker.as_str()))
}

fn append_label(buffer: &mut String, label: &str) {
    if !label.is_empty() {
        buffer.push_str(" (");
        buffer.push_str(label);
        buffer.push(')');
    }
}
