//! Resumable batch runner
//!
//! Drives a phase's work list through fetch → sink write → checkpoint. The
//! sink write always happens before the checkpoint advance, so a crash
//! between the two re-does work instead of skipping it.

use futures_util::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::{halve_batch_size, ChunkPolicy, RunnerConfig};
use super::job::{PhaseOutcome, PhaseReport};
use super::progress::{ProgressState, ProgressTracker};
use super::work::{PagedWork, PhaseWork};
use super::{RunnerError, WorkError};
use crate::fetcher::FetchAttemptResult;
use crate::metrics;
use crate::resume::{Checkpoint, CheckpointStore};
use crate::shutdown::{self, SharedShutdown};
use crate::sink::{Filter, Sink};

/// What [`ResumableBatchRunner::prepare_phase`] decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhasePreparation {
    /// Phase is completed and its data is present
    Skip,
    /// Phase must run; `healed` when a completed phase was demoted
    Run {
        /// Completed phase re-opened because the sink had no data
        healed: bool,
    },
}

/// Result of fetching and storing one item or chunk
#[derive(Debug)]
enum StepOutcome {
    Stored { documents: u64 },
    FetchFailed(FetchAttemptResult),
    Errored,
}

/// Runner owning the checkpoint of a crawl.
///
/// All checkpoint writes go through this type; in pool mode workers only
/// fetch, and the runner loop performs sink and checkpoint writes.
pub struct ResumableBatchRunner {
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn Sink>,
    checkpoint: Checkpoint,
    config: RunnerConfig,
    progress_tracker: ProgressTracker,
    shutdown: Option<SharedShutdown>,
    progress_bar: Option<ProgressBar>,
}

impl ResumableBatchRunner {
    /// Load the checkpoint (or start empty) and bind the sink
    pub fn open(store: Arc<dyn CheckpointStore>, sink: Arc<dyn Sink>) -> Result<Self, RunnerError> {
        let checkpoint = match store.load()? {
            Some(checkpoint) => checkpoint,
            None => {
                info!(store = %store.describe(), "No checkpoint found, starting fresh");
                Checkpoint::new()
            }
        };

        Ok(Self {
            store,
            sink,
            checkpoint,
            config: RunnerConfig::default(),
            progress_tracker: ProgressTracker::default(),
            shutdown: shutdown::get_global_shutdown(),
            progress_bar: None,
        })
    }

    /// Override runner settings
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set item-mode concurrency (clamped)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config = self.config.with_concurrency(concurrency);
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Drive a terminal progress bar alongside the log lines
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Current in-memory checkpoint (always equal to the last persisted one)
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Sink the runner writes to
    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    /// Decide whether a phase runs, healing completed phases with no data.
    pub async fn prepare_phase(
        &mut self,
        phase: &str,
        collection: &str,
    ) -> Result<PhasePreparation, RunnerError> {
        if self.checkpoint.is_completed(phase) {
            if self.sink.exists(collection, &Filter::all()).await? {
                info!(phase = phase, collection = collection, "Phase already completed, skipping");
                return Ok(PhasePreparation::Skip);
            }

            warn!(
                phase = phase,
                collection = collection,
                "Phase marked completed but no data found, re-running"
            );
            self.checkpoint.phase_mut(phase).demote();
            self.persist().await?;
            return Ok(PhasePreparation::Run { healed: true });
        }

        let progress = self.checkpoint.phase_mut(phase);
        let was_started = progress.status() != crate::resume::PhaseStatus::NotStarted;
        progress.start();
        if !was_started {
            self.persist().await?;
        }
        Ok(PhasePreparation::Run { healed: false })
    }

    /// Index of the first item after the recorded cursor (0 if unknown).
    pub fn resume_index(&self, phase: &str, items: &[String]) -> usize {
        let Some(last) = self
            .checkpoint
            .phase(phase)
            .and_then(|p| p.last_completed_item())
        else {
            return 0;
        };

        match items.iter().position(|id| id == last) {
            Some(index) => index + 1,
            None => {
                warn!(
                    phase = phase,
                    last_completed_item = last,
                    "Recorded item not in work list, starting from the beginning"
                );
                0
            }
        }
    }

    /// Run a phase one item at a time (or through the worker pool).
    ///
    /// Failed items are logged and skipped; only checkpoint and sink-state
    /// errors abort the run.
    pub async fn run_items<W>(
        &mut self,
        phase: &str,
        items: &[String],
        work: &W,
    ) -> Result<PhaseReport, RunnerError>
    where
        W: PhaseWork + ?Sized,
    {
        let span = info_span!(
            "run_items",
            phase = phase,
            collection = work.collection(),
            items = items.len(),
            concurrency = self.config.concurrency
        );

        async move {
            let mut report = PhaseReport::new(phase);
            match self.prepare_phase(phase, work.collection()).await? {
                PhasePreparation::Skip => return Ok(self.skipped_report(report)),
                PhasePreparation::Run { healed } => report.healed = healed,
            }

            let start = self.resume_index(phase, items);
            report.resumed_from = start;
            info!(resume_index = start, "Starting phase");

            let mut progress = self.start_progress(phase, items.len(), start);
            let remaining = &items[start..];

            let interrupted = if self.config.concurrency <= 1 {
                self.items_sequential(phase, remaining, work, &mut report, &mut progress)
                    .await?
            } else {
                self.items_pooled(phase, remaining, work, &mut report, &mut progress)
                    .await?
            };

            self.finish(phase, interrupted, report).await
        }
        .instrument(span)
        .await
    }

    async fn items_sequential<W>(
        &mut self,
        phase: &str,
        items: &[String],
        work: &W,
        report: &mut PhaseReport,
        progress: &mut ProgressState,
    ) -> Result<bool, RunnerError>
    where
        W: PhaseWork + ?Sized,
    {
        let sink = self.sink.clone();

        for id in items {
            if self.shutdown_requested() {
                info!(next_item = %id, "Shutdown requested - stopping before next item");
                return Ok(true);
            }

            let ids = std::slice::from_ref(id);
            let fetched = work.fetch(ids).await;
            let outcome = store_fetched(sink.as_ref(), work, ids, fetched).await;
            self.apply_item_outcome(phase, id, outcome, report);
            self.persist().await?;
            self.tick(progress, 1);
        }

        Ok(false)
    }

    /// Run items through a bounded worker pool.
    ///
    /// Each worker stores its own result, so a slow sink write does not hold
    /// back other in-flight fetches. The checkpoint save between completions
    /// still pauses polling of the pool.
    async fn items_pooled<W>(
        &mut self,
        phase: &str,
        items: &[String],
        work: &W,
        report: &mut PhaseReport,
        progress: &mut ProgressState,
    ) -> Result<bool, RunnerError>
    where
        W: PhaseWork + ?Sized,
    {
        let sink = self.sink.clone();
        let sink = sink.as_ref();
        let shutdown = self.shutdown.clone();

        // Workers fetch and store; only this loop moves the cursor
        let mut results = stream::iter(items.iter().enumerate())
            .take_while(|_| {
                let stop = shutdown
                    .as_ref()
                    .is_some_and(|s| s.is_shutdown_requested());
                std::future::ready(!stop)
            })
            .map(|(offset, id)| async move {
                let ids = std::slice::from_ref(id);
                let fetched = work.fetch(ids).await;
                (offset, store_fetched(sink, work, ids, fetched).await)
            })
            .buffer_unordered(self.config.concurrency);

        let mut resolved: Vec<Option<StepOutcome>> = Vec::with_capacity(items.len());
        resolved.resize_with(items.len(), || None);
        let mut next = 0usize;

        while let Some((offset, outcome)) = results.next().await {
            resolved[offset] = Some(outcome);

            // Advance only over the contiguous prefix of resolved items
            let mut advanced = 0u64;
            while next < items.len() {
                let Some(outcome) = resolved[next].take() else {
                    break;
                };
                self.apply_item_outcome(phase, &items[next], outcome, report);
                next += 1;
                advanced += 1;
            }

            if advanced > 0 {
                self.persist().await?;
                self.tick(progress, advanced);
            }
        }

        let interrupted = next < items.len();
        if interrupted {
            info!(
                processed = next,
                remaining = items.len() - next,
                "Shutdown requested - worker pool drained"
            );
        }
        Ok(interrupted)
    }

    fn apply_item_outcome(
        &mut self,
        phase: &str,
        id: &str,
        outcome: StepOutcome,
        report: &mut PhaseReport,
    ) {
        let progress = self.checkpoint.phase_mut(phase);
        match outcome {
            StepOutcome::Stored { documents } => {
                progress.record_success(Some(id), 1);
                report.items_succeeded += 1;
                report.documents_written += documents;
                metrics::record_item(phase, true);
            }
            StepOutcome::FetchFailed(_) | StepOutcome::Errored => {
                progress.record_failure(1);
                report.items_failed += 1;
                metrics::record_item(phase, false);
            }
        }
    }

    /// Run a phase in chunks, halving the chunk on "too large" responses.
    pub async fn run_chunks<W>(
        &mut self,
        phase: &str,
        items: &[String],
        work: &W,
        policy: &ChunkPolicy,
    ) -> Result<PhaseReport, RunnerError>
    where
        W: PhaseWork + ?Sized,
    {
        policy.validate().map_err(RunnerError::InvalidConfig)?;

        let span = info_span!(
            "run_chunks",
            phase = phase,
            collection = work.collection(),
            items = items.len()
        );

        async move {
            let mut report = PhaseReport::new(phase);
            match self.prepare_phase(phase, work.collection()).await? {
                PhasePreparation::Skip => return Ok(self.skipped_report(report)),
                PhasePreparation::Run { healed } => report.healed = healed,
            }

            let mut batch_size = self
                .checkpoint
                .phase(phase)
                .and_then(|p| p.batch_size_hint())
                .unwrap_or(policy.initial_batch_size)
                .max(policy.min_batch_size);

            let mut index = self.resume_index(phase, items);
            report.resumed_from = index;
            info!(resume_index = index, batch_size = batch_size, "Starting chunked phase");

            let mut progress = self.start_progress(phase, items.len(), index);
            let sink = self.sink.clone();
            let mut interrupted = false;

            while index < items.len() {
                if self.shutdown_requested() {
                    info!(next_index = index, "Shutdown requested - stopping before next chunk");
                    interrupted = true;
                    break;
                }

                let end = (index + batch_size).min(items.len());
                let chunk = &items[index..end];
                debug!(start = index, size = chunk.len(), "Fetching chunk");

                let fetched = work.fetch(chunk).await;
                let outcome = store_fetched(sink.as_ref(), work, chunk, fetched).await;
                let chunk_len = chunk.len() as u64;

                match outcome {
                    StepOutcome::Stored { documents } => {
                        self.checkpoint
                            .phase_mut(phase)
                            .record_success(chunk.last().map(String::as_str), chunk_len);
                        report.items_succeeded += chunk_len;
                        report.documents_written += documents;
                        for _ in 0..chunk_len {
                            metrics::record_item(phase, true);
                        }
                    }
                    StepOutcome::FetchFailed(result)
                        if policy.should_shrink(result.status_code)
                            && chunk.len() > policy.min_batch_size =>
                    {
                        let smaller = halve_batch_size(chunk.len(), policy.min_batch_size);
                        warn!(
                            status = ?result.status_code,
                            from = batch_size,
                            to = smaller,
                            "Chunk rejected as too large, halving batch size"
                        );
                        batch_size = smaller;
                        self.checkpoint.phase_mut(phase).set_batch_size_hint(smaller);
                        self.persist().await?;
                        // Same start index, smaller chunk
                        continue;
                    }
                    StepOutcome::FetchFailed(_) | StepOutcome::Errored => {
                        error!(
                            start = index,
                            size = chunk.len(),
                            batch_size = batch_size,
                            "Chunk failed, skipping"
                        );
                        self.checkpoint.phase_mut(phase).record_failure(chunk_len);
                        report.items_failed += chunk_len;
                        for _ in 0..chunk_len {
                            metrics::record_item(phase, false);
                        }
                    }
                }

                self.persist().await?;
                self.tick(&mut progress, chunk_len);
                index = end;
            }

            report.batch_size = Some(batch_size);
            self.finish(phase, interrupted, report).await
        }
        .instrument(span)
        .await
    }

    /// Walk an open-ended listing page by page.
    ///
    /// Each stored page persists the next cursor. A failed page stops the
    /// phase, leaving it in progress, since a listing cannot skip ahead.
    pub async fn run_pages<W>(&mut self, phase: &str, work: &W) -> Result<PhaseReport, RunnerError>
    where
        W: PagedWork + ?Sized,
    {
        let span = info_span!("run_pages", phase = phase, collection = work.collection());

        async move {
            let mut report = PhaseReport::new(phase);
            match self.prepare_phase(phase, work.collection()).await? {
                PhasePreparation::Skip => return Ok(self.skipped_report(report)),
                PhasePreparation::Run { healed } => report.healed = healed,
            }

            let mut cursor: Option<String> = self
                .checkpoint
                .phase(phase)
                .and_then(|p| p.last_completed_item())
                .map(str::to_string);
            info!(cursor = ?cursor, "Starting paged phase");

            let mut progress = self.start_progress(phase, 0, 0);
            progress.total_expected = None;
            let sink = self.sink.clone();

            loop {
                if self.shutdown_requested() {
                    info!(cursor = ?cursor, "Shutdown requested - stopping before next page");
                    return self.finish(phase, true, report).await;
                }

                let stored = match work.fetch_page(cursor.as_deref()).await {
                    Ok(result) if result.succeeded => {
                        match work.store_page(sink.as_ref(), cursor.as_deref(), &result).await {
                            Ok(summary) => Ok(summary),
                            Err(e) => Err(e.to_string()),
                        }
                    }
                    Ok(result) => Err(result
                        .failure
                        .map(|f| f.to_string())
                        .unwrap_or_else(|| "fetch failed".to_string())),
                    Err(e) => Err(e.to_string()),
                };

                let summary = match stored {
                    Ok(summary) => summary,
                    Err(message) => {
                        error!(cursor = ?cursor, error = %message, "Page failed, stopping phase");
                        self.checkpoint.phase_mut(phase).record_failure(1);
                        report.items_failed += 1;
                        metrics::record_item(phase, false);
                        self.persist().await?;
                        report.outcome = PhaseOutcome::Stalled;
                        report.status = self.phase_status(phase);
                        return Ok(report);
                    }
                };

                report.items_succeeded += 1;
                report.documents_written += summary.stored;
                metrics::record_item(phase, true);
                self.tick(&mut progress, 1);

                let next = summary
                    .next_cursor
                    .filter(|next| summary.stored > 0 && Some(next) != cursor.as_ref());

                match next {
                    Some(next) => {
                        self.checkpoint
                            .phase_mut(phase)
                            .record_success(Some(&next), 1);
                        self.persist().await?;
                        cursor = Some(next);
                    }
                    None => {
                        self.checkpoint.phase_mut(phase).record_success(None, 1);
                        debug!(pages = report.items_succeeded, "Listing exhausted");
                        return self.finish(phase, false, report).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Persist the checkpoint, retrying before giving up.
    async fn persist(&mut self) -> Result<(), RunnerError> {
        let attempts = self.config.checkpoint_save_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let started = Instant::now();
            match self.store.save(&self.checkpoint) {
                Ok(()) => {
                    metrics::record_checkpoint_save(started.elapsed(), true);
                    return Ok(());
                }
                Err(e) => {
                    metrics::record_checkpoint_save(started.elapsed(), false);
                    warn!(
                        attempt = attempt,
                        max_attempts = attempts,
                        store = %self.store.describe(),
                        error = %e,
                        "Checkpoint save failed"
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.checkpoint_retry_backoff).await;
                    }
                }
            }
        }

        error!(attempts = attempts, error = %last_error, "Giving up on checkpoint save");
        Err(RunnerError::CheckpointWriteFailure {
            attempts,
            message: last_error,
        })
    }

    async fn finish(
        &mut self,
        phase: &str,
        interrupted: bool,
        mut report: PhaseReport,
    ) -> Result<PhaseReport, RunnerError> {
        if interrupted {
            report.outcome = PhaseOutcome::Interrupted;
        } else {
            self.checkpoint.phase_mut(phase).mark_completed();
            report.outcome = PhaseOutcome::Completed;
        }
        self.persist().await?;
        report.status = self.phase_status(phase);

        if let Some(bar) = &self.progress_bar {
            bar.finish_with_message(format!("{phase} {:?}", report.outcome).to_lowercase());
        }

        info!(
            outcome = ?report.outcome,
            succeeded = report.items_succeeded,
            failed = report.items_failed,
            documents = report.documents_written,
            "Phase finished"
        );
        Ok(report)
    }

    fn skipped_report(&self, mut report: PhaseReport) -> PhaseReport {
        report.outcome = PhaseOutcome::Skipped;
        report.status = self.phase_status(&report.phase);
        report
    }

    fn phase_status(&self, phase: &str) -> crate::resume::PhaseStatus {
        self.checkpoint
            .phase(phase)
            .map(|p| p.status())
            .unwrap_or_default()
    }

    fn start_progress(&self, phase: &str, total: usize, skipped: usize) -> ProgressState {
        let mut progress = self.progress_tracker.create_state(phase, Some(total as u64));
        progress.set_skipped(skipped as u64);
        if let Some(bar) = &self.progress_bar {
            bar.set_length(total as u64);
            bar.set_position(skipped as u64);
            bar.set_message(phase.to_string());
        }
        progress
    }

    fn tick(&self, progress: &mut ProgressState, items: u64) {
        progress.update(items);
        if progress.should_emit_update() {
            info!("{}", progress.format_progress());
            progress.mark_emitted();
        }
        if let Some(bar) = &self.progress_bar {
            bar.inc(items);
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

/// Store a fetch result through the work, logging failures.
async fn store_fetched<W>(
    sink: &dyn Sink,
    work: &W,
    ids: &[String],
    fetched: Result<FetchAttemptResult, WorkError>,
) -> StepOutcome
where
    W: PhaseWork + ?Sized,
{
    let label = ids.first().map(String::as_str).unwrap_or_default();
    match fetched {
        Ok(result) if result.succeeded => match work.store(sink, ids, &result).await {
            Ok(documents) => StepOutcome::Stored { documents },
            Err(e) => {
                error!(item = label, items = ids.len(), error = %e, "Failed to store payload");
                StepOutcome::Errored
            }
        },
        Ok(result) => {
            warn!(
                item = label,
                items = ids.len(),
                status = ?result.status_code,
                retries = result.retries_used,
                failure = ?result.failure,
                "Fetch failed, skipping"
            );
            StepOutcome::FetchFailed(result)
        }
        Err(e) => {
            error!(item = label, items = ids.len(), error = %e, "Fetch could not be issued");
            StepOutcome::Errored
        }
    }
}
