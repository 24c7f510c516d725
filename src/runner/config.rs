//! Runner configuration constants

use std::time::Duration;

/// Attempts made to persist a checkpoint before the run is aborted.
pub const CHECKPOINT_SAVE_ATTEMPTS: u32 = 3;

/// Pause between checkpoint save attempts.
pub const CHECKPOINT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Chunk size used when a phase has no persisted hint.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Floor for batch halving; a chunk failing at this size is skipped.
pub const MIN_BATCH_SIZE: usize = 10;

/// Statuses that mean "request too large" for chunked requests.
pub const DEFAULT_SHRINK_STATUSES: [u16; 3] = [400, 413, 414];

/// Upper bound on concurrent fetches in item mode.
pub const MAX_CONCURRENCY: usize = 32;

/// Halve a batch size, never going below `min`.
pub fn halve_batch_size(current: usize, min: usize) -> usize {
    (current / 2).max(min).max(1)
}

/// Batch shrinking policy for chunked phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Size used when no hint is persisted
    pub initial_batch_size: usize,
    /// Floor for halving
    pub min_batch_size: usize,
    /// Failure statuses that trigger halving
    pub shrink_statuses: Vec<u16>,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            initial_batch_size: DEFAULT_BATCH_SIZE,
            min_batch_size: MIN_BATCH_SIZE,
            shrink_statuses: DEFAULT_SHRINK_STATUSES.to_vec(),
        }
    }
}

impl ChunkPolicy {
    /// Whether a failure status should shrink the batch
    pub fn should_shrink(&self, status: Option<u16>) -> bool {
        status.is_some_and(|s| self.shrink_statuses.contains(&s))
    }

    /// Check the policy for values that would stall the loop
    pub fn validate(&self) -> Result<(), String> {
        if self.min_batch_size == 0 {
            return Err("min batch size must be at least 1".to_string());
        }
        if self.initial_batch_size < self.min_batch_size {
            return Err(format!(
                "initial batch size ({}) must not be below min batch size ({})",
                self.initial_batch_size, self.min_batch_size
            ));
        }
        Ok(())
    }
}

/// Runner-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Concurrent fetches in item mode (1 = sequential)
    pub concurrency: usize,
    /// Checkpoint save attempts before aborting
    pub checkpoint_save_attempts: u32,
    /// Pause between save attempts
    pub checkpoint_retry_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            checkpoint_save_attempts: CHECKPOINT_SAVE_ATTEMPTS,
            checkpoint_retry_backoff: CHECKPOINT_RETRY_BACKOFF,
        }
    }
}

impl RunnerConfig {
    /// Set concurrency, clamped to `1..=MAX_CONCURRENCY`
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }
}
