//! Periodic progress reporting for long-running phases.
//!
//! The runner feeds item counts into a [`ProgressState`]; an update is logged
//! whenever completion jumps by the configured percentage step or, for long
//! phases, when the update interval has passed.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Build a [`ProgressState`] for one phase.
    pub fn create_state(&self, phase: &str, total_expected: Option<u64>) -> ProgressState {
        let mut state = ProgressState::new(phase, total_expected);
        state.update_interval = self.update_interval;
        state.min_percentage_step = self.min_percentage_step;
        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, DEFAULT_PERCENTAGE_STEP)
    }
}

/// Progress of one phase run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Phase name
    pub phase: String,
    /// Items processed in this run (stored or failed)
    pub items_processed: u64,
    /// Items already done before this run started
    pub items_skipped: u64,
    /// Total items in the work list, if known
    pub total_expected: Option<u64>,
    /// When the run started
    pub start_time: Instant,
    /// Last time progress was reported
    pub last_update: Instant,
    /// Minimum interval between time-based updates
    pub update_interval: Duration,
    /// Items per second over the whole run
    pub current_rate: f64,
    /// Last reported completion percentage
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a state with default intervals.
    pub fn new(phase: impl Into<String>, total_expected: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            phase: phase.into(),
            items_processed: 0,
            items_skipped: 0,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: DEFAULT_PERCENTAGE_STEP,
        }
    }

    /// Record items finished before this run (resume offset).
    pub fn set_skipped(&mut self, skipped: u64) {
        self.items_skipped = skipped;
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Add newly processed items.
    pub fn update(&mut self, new_items: u64) {
        self.items_processed = self.items_processed.saturating_add(new_items);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.items_processed as f64 / elapsed;
        }
    }

    /// Whether an update should be logged now.
    pub fn should_emit_update(&self) -> bool {
        if self.items_processed == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Reset timers after logging an update.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100) including resumed items.
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        let done = self.items_processed + self.items_skipped;
        Some((done as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Estimated time until the work list is exhausted.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let total = self.total_expected?;
        let remaining = total.saturating_sub(self.items_processed + self.items_skipped);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}: processed {} items",
            self.phase, self.items_processed
        )];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} items/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
