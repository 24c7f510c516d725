//! Rate-limited HTTP fetcher
//!
//! Wraps a shared `reqwest::Client` with an [`AdaptiveDelay`] limiter and a
//! bounded retry loop:
//! - 2xx: success (unless the body is a known block page)
//! - 429, block pages, 5xx and network errors: grow the delay and retry
//! - other 4xx: returned immediately
//!
//! The sleep before each attempt is the limiter's current delay, so the delay
//! grown by a failure is slept exactly once before the retry.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::rate_limit::AdaptiveDelay;
use super::retry_formatter::{extract_error_type, looks_like_block_page, RetryContext, RetryErrorType};
use super::target::{FetchTarget, HttpMethod};
use super::{FetchAttemptResult, FetchFailure, FetcherResult};
use crate::metrics::{self, HttpRequestMetrics};

/// Fetcher bound to one host limiter.
///
/// Cheap to clone; clones share the client and the limiter.
#[derive(Debug, Clone)]
pub struct RateLimitedFetcher {
    client: Arc<Client>,
    limiter: Arc<AdaptiveDelay>,
    block_markers: Arc<Vec<String>>,
}

/// Classified failure of a single attempt
struct AttemptFailure {
    error_type: RetryErrorType,
    status: Option<u16>,
    retry_hint: Option<Duration>,
    message: String,
}

/// What a single attempt produced
enum AttemptOutcome {
    Success { status: u16, body: Bytes },
    ClientError { status: u16 },
    Retryable(AttemptFailure),
}

impl RateLimitedFetcher {
    /// Create a fetcher
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `limiter` - Shared limiter for the target host
    pub fn new(client: Arc<Client>, limiter: Arc<AdaptiveDelay>) -> Self {
        Self {
            client,
            limiter,
            block_markers: Arc::new(Vec::new()),
        }
    }

    /// Treat 2xx bodies containing any of these markers as block pages
    pub fn with_block_markers(mut self, markers: Vec<String>) -> Self {
        self.block_markers = Arc::new(markers);
        self
    }

    /// Limiter this fetcher reports to
    pub fn limiter(&self) -> &Arc<AdaptiveDelay> {
        &self.limiter
    }

    /// Perform one logical fetch with retries.
    ///
    /// # Errors
    /// Returns `Err` only when the target itself is malformed. Remote and
    /// network failures are reported in the returned [`FetchAttemptResult`].
    pub async fn fetch(&self, target: &FetchTarget) -> FetcherResult<FetchAttemptResult> {
        let url = target.parsed_url()?;
        let host = self.limiter.host().to_string();
        let max_retries = self.limiter.config().max_retries;
        let max_attempts = max_retries + 1;

        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 0..=max_retries {
            self.limiter.wait().await;

            let request_metrics = HttpRequestMetrics::start(&host, attempt + 1);
            let outcome = self.attempt(&url, target, &request_metrics).await;

            let failure = match outcome {
                AttemptOutcome::Success { status, body } => {
                    self.limiter.record_success();
                    metrics::record_fetch_outcome(&host, "succeeded");
                    if attempt > 0 {
                        let ctx = RetryContext::new(
                            attempt + 1,
                            max_attempts,
                            RetryErrorType::NetworkGeneric,
                            Duration::ZERO,
                            target.label(),
                            "",
                            target.url(),
                        );
                        info!("{}", ctx.format_success());
                    }
                    return Ok(FetchAttemptResult::success(status, attempt, body));
                }
                AttemptOutcome::ClientError { status } => {
                    metrics::record_fetch_outcome(&host, "client_error");
                    warn!(
                        label = %target.label(),
                        url = %target.url(),
                        status = status,
                        "{}, not retrying",
                        extract_error_type(StatusCode::from_u16(status).ok(), None).description()
                    );
                    return Ok(FetchAttemptResult::failed(
                        Some(status),
                        attempt,
                        FetchFailure::ClientError { status },
                    ));
                }
                AttemptOutcome::Retryable(failure) => failure,
            };

            let next_delay = self.limiter.record_failure(failure.retry_hint);

            if attempt < max_retries {
                let ctx = RetryContext::new(
                    attempt + 1,
                    max_attempts,
                    failure.error_type,
                    next_delay,
                    target.label(),
                    failure.message.as_str(),
                    target.url(),
                );
                warn!("{}", ctx.format_retry());
                debug!(details = %failure.message, "Retry cause");
                metrics::record_retry_backoff(&host, next_delay, attempt + 1);
            }

            last_failure = Some(failure);
        }

        let (last_error, last_status, message) = match last_failure {
            Some(f) => (f.error_type, f.status, f.message),
            None => (RetryErrorType::NetworkGeneric, None, String::new()),
        };

        let ctx = RetryContext::new(
            max_attempts,
            max_attempts,
            last_error,
            Duration::ZERO,
            target.label(),
            message,
            target.url(),
        );
        warn!("{}", ctx.format_failure());
        metrics::record_fetch_outcome(&host, "exhausted");

        Ok(FetchAttemptResult::failed(
            last_status,
            max_retries,
            FetchFailure::ExhaustedRetries { last_error },
        ))
    }

    async fn attempt(
        &self,
        url: &Url,
        target: &FetchTarget,
        request_metrics: &HttpRequestMetrics,
    ) -> AttemptOutcome {
        let response = match self.build_request(url, target).send().await {
            Ok(resp) => resp,
            Err(e) => {
                request_metrics.record_network_error();
                return AttemptOutcome::Retryable(AttemptFailure {
                    error_type: extract_error_type(None, Some(&e)),
                    status: None,
                    retry_hint: None,
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        request_metrics.record_complete(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_hint = parse_retry_after(response.headers(), Utc::now());
            return AttemptOutcome::Retryable(AttemptFailure {
                error_type: RetryErrorType::RateLimit,
                status: Some(429),
                retry_hint,
                message: match retry_hint {
                    Some(hint) => format!("HTTP 429 (Retry-After {:.2}s)", hint.as_secs_f64()),
                    None => "HTTP 429".to_string(),
                },
            });
        }

        if status.is_client_error() {
            return AttemptOutcome::ClientError {
                status: status.as_u16(),
            };
        }

        if !status.is_success() {
            return AttemptOutcome::Retryable(AttemptFailure {
                error_type: extract_error_type(Some(status), None),
                status: Some(status.as_u16()),
                retry_hint: None,
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        match response.bytes().await {
            Ok(body) if looks_like_block_page(&body, &self.block_markers) => {
                request_metrics.record_block_page();
                AttemptOutcome::Retryable(AttemptFailure {
                    error_type: RetryErrorType::BlockPage,
                    status: Some(status.as_u16()),
                    retry_hint: None,
                    message: "response body matched a block marker".to_string(),
                })
            }
            Ok(body) => AttemptOutcome::Success {
                status: status.as_u16(),
                body,
            },
            Err(e) => AttemptOutcome::Retryable(AttemptFailure {
                error_type: extract_error_type(None, Some(&e)),
                status: Some(status.as_u16()),
                retry_hint: None,
                message: format!("failed to read body: {e}"),
            }),
        }
    }

    fn build_request(&self, url: &Url, target: &FetchTarget) -> RequestBuilder {
        let mut request = match target.method() {
            HttpMethod::Get => self.client.get(url.clone()),
            HttpMethod::Post => self.client.post(url.clone()),
        };

        if !target.query().is_empty() {
            request = request.query(target.query());
        }
        for (name, value) in target.headers() {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = target.body() {
            request = request.json(body);
        }
        request
    }
}

/// Parse a `Retry-After` header given as delta-seconds or an HTTP date.
///
/// Dates in the past yield a zero hint; unparsable values yield `None`.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after_value(raw, now)
}

/// Parse the raw value of a `Retry-After` header.
pub fn parse_retry_after_value(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    // Some APIs send fractional seconds
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_nan() || secs < 0.0 {
            return None;
        }
        // Waits too long for a Duration saturate
        return Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX));
    }

    let date = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((date - now).to_std().unwrap_or(Duration::ZERO))
}
