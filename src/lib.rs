//! # Manga Harvester Library
//!
//! Rate-limited, resumable harvesting of manga metadata from public APIs
//! (MangaDex, Jikan/MyAnimeList, AniList, MangaUpdates, ...). Designed for
//! long crawls that must survive rate limits, block pages, crashes and
//! Ctrl+C without losing or skipping work.
//!
//! ## Features
//!
//! - **Adaptive pacing**: per-host delay that backs off on 429/5xx, honours
//!   `Retry-After`, shrinks on success and drops to zero after a success streak
//! - **Resumable phases**: versioned checkpoint, advanced only after the data
//!   is stored, with self-healing of phases whose data went missing
//! - **Chunked requests**: batch size halves on "request too large" responses
//!   and the smaller size survives restarts
//! - **Idempotent storage**: documents keyed by `_id`, so a redone item
//!   replaces rather than duplicates
//! - **CSV export**: flatten harvested collections into seed tables
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use manga_harvester::fetcher::shared_resources::{global_host_limiters, global_http_client};
//! use manga_harvester::fetcher::{RateLimitedFetcher, UrlTemplate};
//! use manga_harvester::registry::SourceRegistry;
//! use manga_harvester::resume::FileCheckpointStore;
//! use manga_harvester::runner::{ResumableBatchRunner, TemplateWork};
//! use manga_harvester::sink::JsonlStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SourceRegistry::load_embedded()?;
//! let mangadex = registry.get("mangadex")?;
//!
//! let limiter = global_host_limiters().limiter_for("api.mangadex.org", mangadex.delay_config());
//! let fetcher = RateLimitedFetcher::new(global_http_client(), limiter);
//! let template = UrlTemplate::new(Some(mangadex.base_url()), "/statistics/manga/{id}")?;
//! let work = TemplateWork::per_item(fetcher, template, "statistics")
//!     .with_result_pointer("/statistics");
//!
//! let sink = Arc::new(JsonlStore::open("./data")?);
//! let store = Arc::new(FileCheckpointStore::new("./data/progress.json"));
//! let mut runner = ResumableBatchRunner::open(store, sink)?;
//!
//! let ids = vec!["a96676e5-8ae2-425e-b549-7f15dd34a6d8".to_string()];
//! let report = runner.run_items("statistics", &ids, &work).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`fetcher`] - Adaptive delay, rate-limited HTTP fetch, pagination
//! - [`runner`] - Resumable batch execution in item, chunk and page mode
//! - [`resume`] - Versioned checkpoint, atomic persistence, owner lock
//! - [`sink`] - Idempotent document stores (memory, JSONL)
//! - [`output`] - CSV flattening export
//! - [`registry`] - Built-in source profiles
//! - [`metrics`] - Prometheus counters and histograms
//! - [`shutdown`] - Graceful Ctrl+C handling

#![warn(missing_docs)]
#![warn(clippy::all)]

/// CLI command implementations
pub mod cli;

/// Rate-limited HTTP fetching
pub mod fetcher;

/// Metrics collection and export
pub mod metrics;

/// Data output writers
pub mod output;

/// Source profile registry
pub mod registry;

/// Checkpoint persistence and resume
pub mod resume;

/// Resumable batch execution
pub mod runner;

/// Graceful shutdown coordination
pub mod shutdown;

/// Document sinks
pub mod sink;

pub use fetcher::{AdaptiveDelay, DelayConfig, FetchAttemptResult, RateLimitedFetcher};
pub use resume::{Checkpoint, PhaseStatus};
pub use runner::{PhaseReport, ResumableBatchRunner};
pub use sink::Sink;
