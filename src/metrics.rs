//! Observability metrics for harvesting runs
//!
//! Tracks request volume per host, 429 and block-page responses, retry
//! backoff, the adaptive delay of each host limiter, and checkpoint writes.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade; calls are no-ops until an exporter is installed
//! - Optional Prometheus scrape endpoint installed by [`init_metrics`]
//! - Correlation ids tie together the log lines of one HTTP attempt

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Error type returned by [`init_metrics`]
pub type MetricsInitError = Box<dyn std::error::Error + Send + Sync>;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

static CORRELATION_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

/// Install the Prometheus exporter and register metric descriptions.
///
/// Idempotent: a second call is a no-op.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsInitError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(format!("Failed to install Prometheus exporter: {e}").into());
    }

    describe_counter!(
        "harvest_http_requests_total",
        Unit::Count,
        "HTTP attempts issued, labelled by host and status"
    );
    describe_counter!(
        "harvest_http_throttled_total",
        Unit::Count,
        "429 responses and block pages received"
    );
    describe_counter!(
        "harvest_http_retries_total",
        Unit::Count,
        "Retry attempts scheduled"
    );
    describe_histogram!(
        "harvest_http_request_duration_seconds",
        Unit::Seconds,
        "HTTP attempt duration"
    );
    describe_histogram!(
        "harvest_retry_backoff_seconds",
        Unit::Seconds,
        "Delay slept before a retry"
    );
    describe_gauge!(
        "harvest_current_delay_seconds",
        Unit::Seconds,
        "Current adaptive delay per host"
    );
    describe_counter!(
        "harvest_fetches_total",
        Unit::Count,
        "Logical fetches, labelled by outcome"
    );
    describe_counter!(
        "harvest_items_total",
        Unit::Count,
        "Work items processed, labelled by phase and outcome"
    );
    describe_histogram!(
        "harvest_checkpoint_save_seconds",
        Unit::Seconds,
        "Checkpoint persistence latency"
    );
    describe_counter!(
        "harvest_checkpoint_save_failures_total",
        Unit::Count,
        "Failed checkpoint save attempts"
    );

    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether the Prometheus exporter is installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Generate a new correlation id for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and labelling for one HTTP attempt
pub struct HttpRequestMetrics {
    host: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording an attempt
    pub fn start(host: impl Into<String>, attempt: u32) -> Self {
        let host = host.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            host = %host,
            attempt = attempt,
            "Starting HTTP request"
        );

        Self {
            host,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record a response with a status code
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "harvest_http_requests_total",
            "host" => self.host.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "harvest_http_request_duration_seconds",
            "host" => self.host.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            self.record_throttled("429");
        }

        debug!(
            correlation_id = %self.correlation_id,
            host = %self.host,
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed"
        );
    }

    /// Record a 2xx body that turned out to be a block page
    pub fn record_block_page(&self) {
        self.record_throttled("block_page");
    }

    /// Record a transport failure (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "harvest_http_requests_total",
            "host" => self.host.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "harvest_http_request_duration_seconds",
            "host" => self.host.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            host = %self.host,
            attempt = self.attempt,
            duration_ms = duration.as_millis() as u64,
            "Network error recorded"
        );
    }

    /// Correlation id of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn record_throttled(&self, kind: &'static str) {
        counter!(
            "harvest_http_throttled_total",
            "host" => self.host.clone(),
            "kind" => kind,
        )
        .increment(1);

        warn!(
            correlation_id = %self.correlation_id,
            host = %self.host,
            attempt = self.attempt,
            kind = kind,
            "Remote is throttling requests"
        );
    }
}

/// Record the delay slept before a retry
pub fn record_retry_backoff(host: &str, duration: Duration, attempt: u32) {
    counter!("harvest_http_retries_total", "host" => host.to_string()).increment(1);
    histogram!("harvest_retry_backoff_seconds", "host" => host.to_string())
        .record(duration.as_secs_f64());

    debug!(
        host = host,
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Publish the current adaptive delay of a host limiter
pub fn record_current_delay(host: &str, delay: Duration) {
    gauge!("harvest_current_delay_seconds", "host" => host.to_string())
        .set(delay.as_secs_f64());
}

/// Record the outcome of a logical fetch
pub fn record_fetch_outcome(host: &str, outcome: &'static str) {
    counter!(
        "harvest_fetches_total",
        "host" => host.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Record a processed work item
pub fn record_item(phase: &str, succeeded: bool) {
    counter!(
        "harvest_items_total",
        "phase" => phase.to_string(),
        "outcome" => if succeeded { "succeeded" } else { "failed" },
    )
    .increment(1);
}

/// Record one checkpoint save attempt
pub fn record_checkpoint_save(duration: Duration, ok: bool) {
    histogram!("harvest_checkpoint_save_seconds").record(duration.as_secs_f64());
    if !ok {
        counter!("harvest_checkpoint_save_failures_total").increment(1);
    }
}
