//! Resumable batch execution
//!
//! The runner drives a phase's work list through fetch → sink → checkpoint
//! so that an interrupted crawl restarts where it stopped.
//!
//! # Overview
//!
//! 1. **Work**: what to fetch and how to store it, see [`work::PhaseWork`]
//!    and [`work::PagedWork`]
//! 2. **Execution**: [`executor::ResumableBatchRunner`] in item, chunk or
//!    page mode
//! 3. **Reports**: per-phase outcome in [`job::PhaseReport`]
//! 4. **Progress**: periodic log lines from [`progress::ProgressState`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use manga_harvester::fetcher::shared_resources::{global_host_limiters, global_http_client};
//! use manga_harvester::fetcher::{DelayConfig, RateLimitedFetcher, UrlTemplate};
//! use manga_harvester::resume::FileCheckpointStore;
//! use manga_harvester::runner::{ResumableBatchRunner, TemplateWork};
//! use manga_harvester::sink::JsonlStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = global_host_limiters().limiter_for("api.mangadex.org", DelayConfig::default());
//! let fetcher = RateLimitedFetcher::new(global_http_client(), limiter);
//! let template = UrlTemplate::new(Some("https://api.mangadex.org"), "/manga/{id}")?;
//! let work = TemplateWork::per_item(fetcher, template, "manga");
//!
//! let sink = Arc::new(JsonlStore::open("./store")?);
//! let store = Arc::new(FileCheckpointStore::new("./store/progress.json"));
//! let mut runner = ResumableBatchRunner::open(store, sink)?;
//!
//! let ids = vec!["a96676e5".to_string(), "32d76d19".to_string()];
//! let report = runner.run_items("manga", &ids, &work).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod executor;
pub mod job;
pub mod progress;
pub mod work;

pub use config::{ChunkPolicy, RunnerConfig};
pub use executor::ResumableBatchRunner;
pub use job::{PhaseOutcome, PhaseReport};
pub use work::{PageSummary, PagedWork, PhaseWork, TemplatePagedWork, TemplateWork};

use crate::fetcher::FetcherError;
use crate::resume::ResumeError;
use crate::sink::SinkError;

/// Runner errors
///
/// Item-level failures are not errors: they are logged, counted and skipped.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Checkpoint could not be loaded
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] ResumeError),

    /// Checkpoint could not be persisted; the run stops
    #[error("checkpoint write failed after {attempts} attempts: {message}")]
    CheckpointWriteFailure {
        /// Attempts made
        attempts: u32,
        /// Last error
        message: String,
    },

    /// Sink could not answer a state query
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Invalid runner or phase configuration
    #[error("configuration error: {0}")]
    InvalidConfig(String),
}

/// Errors raised by work implementations for a single item, chunk or page
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// Fetch could not be issued
    #[error(transparent)]
    Fetcher(#[from] FetcherError),

    /// Sink rejected the documents
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Payload did not have the expected shape
    #[error("unexpected payload: {0}")]
    Payload(String),
}
