//! Adaptive delay with multiplicative backoff and burst reset
//!
//! One [`AdaptiveDelay`] exists per remote host. Every request against that
//! host sleeps for the current delay first; successes shrink the delay and
//! failures grow it, so the effective request rate converges on what the
//! remote service tolerates.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Default minimum delay between requests once backoff has kicked in.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);

/// Default ceiling for the adaptive delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default growth factor applied on failure.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default streak length that drops the delay back to zero.
pub const DEFAULT_BURST_SUCCESS_THRESHOLD: u32 = 10;

/// Default shrink factor applied on success.
pub const DEFAULT_SUCCESS_SHRINK_FACTOR: f64 = 0.9;

/// Seed used when a failure hits a zero delay and `min_delay` is also zero.
const ZERO_DELAY_SEED: Duration = Duration::from_millis(100);

/// Tuning knobs for one rate domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayConfig {
    /// Floor applied when shrinking after a success
    pub min_delay: Duration,
    /// Ceiling applied when growing after a failure (`None` = uncapped)
    pub max_delay: Option<Duration>,
    /// Retries allowed after the first attempt of a logical fetch
    pub max_retries: u32,
    /// Multiplier applied on failure
    pub backoff_multiplier: f64,
    /// Consecutive successes that reset the delay to zero
    pub burst_success_threshold: u32,
    /// Multiplier applied on success
    pub success_shrink_factor: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: Some(DEFAULT_MAX_DELAY),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            burst_success_threshold: DEFAULT_BURST_SUCCESS_THRESHOLD,
            success_shrink_factor: DEFAULT_SUCCESS_SHRINK_FACTOR,
        }
    }
}

impl DelayConfig {
    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the delay bounds
    pub fn with_bounds(mut self, min_delay: Duration, max_delay: Option<Duration>) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// Override the burst threshold
    pub fn with_burst_threshold(mut self, threshold: u32) -> Self {
        self.burst_success_threshold = threshold;
        self
    }

    /// Check the configuration for values that would break the delay invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.success_shrink_factor) {
            return Err(format!(
                "success shrink factor must be within [0, 1], got {}",
                self.success_shrink_factor
            ));
        }
        if let Some(max) = self.max_delay {
            if max < self.min_delay {
                return Err(format!(
                    "max delay ({max:?}) must not be below min delay ({:?})",
                    self.min_delay
                ));
            }
        }
        Ok(())
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Delay bookkeeping for one rate domain.
///
/// `current_delay` only grows on failure and only shrinks on success; a long
/// enough success streak drops it to zero ("burst mode").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelayState {
    current_delay: Duration,
    consecutive_successes: u32,
}

impl DelayState {
    /// Start in burst mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an explicit delay
    pub fn with_delay(current_delay: Duration) -> Self {
        Self {
            current_delay,
            consecutive_successes: 0,
        }
    }

    /// Delay slept before the next request
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Successes since the last failure or burst reset
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Whether the next request goes out without sleeping
    pub fn is_burst(&self) -> bool {
        self.current_delay.is_zero()
    }

    /// Apply a successful response.
    ///
    /// Returns `true` when this success triggered the burst reset.
    pub fn record_success(&mut self, config: &DelayConfig) -> bool {
        if !self.current_delay.is_zero() {
            let shrunk = scale(self.current_delay, config.success_shrink_factor);
            self.current_delay = shrunk.max(config.min_delay);
        }

        self.consecutive_successes += 1;
        if config.burst_success_threshold > 0
            && self.consecutive_successes >= config.burst_success_threshold
        {
            self.current_delay = Duration::ZERO;
            self.consecutive_successes = 0;
            return true;
        }
        false
    }

    /// Apply a failed attempt, optionally carrying a server-provided wait hint.
    ///
    /// A hint replaces multiplicative growth but never lowers the delay.
    pub fn record_failure(&mut self, config: &DelayConfig, retry_hint: Option<Duration>) {
        self.consecutive_successes = 0;

        let grown = match retry_hint {
            Some(hint) => self.current_delay.max(hint),
            None if self.current_delay.is_zero() => {
                if config.min_delay.is_zero() {
                    ZERO_DELAY_SEED
                } else {
                    config.min_delay
                }
            }
            None => scale(self.current_delay, config.backoff_multiplier),
        };

        // Capping must not undo a delay that already sits above the ceiling
        self.current_delay = config.cap(grown).max(self.current_delay);
    }
}

/// Multiply a delay, saturating at `Duration::MAX` instead of panicking
fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Shared limiter for one remote host.
///
/// State updates take a short synchronous lock; the pre-request sleep is
/// serialized through an async gate so concurrent workers space out their
/// requests without serializing the requests themselves.
#[derive(Debug)]
pub struct AdaptiveDelay {
    host: String,
    config: DelayConfig,
    state: Mutex<DelayState>,
    gate: AsyncMutex<()>,
}

impl AdaptiveDelay {
    /// Create a limiter in burst mode
    pub fn new(host: impl Into<String>, config: DelayConfig) -> Self {
        Self::with_state(host, config, DelayState::new())
    }

    /// Create a limiter from an existing state
    pub fn with_state(host: impl Into<String>, config: DelayConfig, state: DelayState) -> Self {
        Self {
            host: host.into(),
            config,
            state: Mutex::new(state),
            gate: AsyncMutex::new(()),
        }
    }

    /// Host this limiter governs
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Limiter configuration
    pub fn config(&self) -> &DelayConfig {
        &self.config
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> DelayState {
        self.lock_state().clone()
    }

    /// Sleep for the current delay before issuing a request.
    ///
    /// Returns the delay that was slept.
    pub async fn wait(&self) -> Duration {
        let _gate = self.gate.lock().await;
        let delay = self.lock_state().current_delay();
        if !delay.is_zero() {
            debug!(host = %self.host, delay_ms = delay.as_millis() as u64, "Waiting before request");
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// Record a successful response
    pub fn record_success(&self) {
        let (burst, delay) = {
            let mut state = self.lock_state();
            let burst = state.record_success(&self.config);
            (burst, state.current_delay())
        };
        crate::metrics::record_current_delay(&self.host, delay);
        if burst {
            info!(host = %self.host, "Sustained success, back to burst mode");
        }
    }

    /// Record a failed attempt and return the new delay
    pub fn record_failure(&self, retry_hint: Option<Duration>) -> Duration {
        let delay = {
            let mut state = self.lock_state();
            state.record_failure(&self.config, retry_hint);
            state.current_delay()
        };
        crate::metrics::record_current_delay(&self.host, delay);
        warn!(
            host = %self.host,
            delay_ms = delay.as_millis() as u64,
            hinted = retry_hint.is_some(),
            "Increased request delay"
        );
        delay
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DelayState> {
        // Poisoning still leaves a valid delay/streak pair
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
