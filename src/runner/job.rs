//! Phase run reports

use crate::resume::PhaseStatus;
use serde::Serialize;

/// How a phase run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// Already completed and the sink still has its data
    Skipped,
    /// Every item was attempted
    Completed,
    /// Stopped by a shutdown request
    Interrupted,
    /// Page mode stopped on a failed page
    Stalled,
}

/// Outcome of one phase run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Phase name
    pub phase: String,
    /// How the run ended
    pub outcome: PhaseOutcome,
    /// Checkpoint status after the run
    pub status: PhaseStatus,
    /// Items (or pages) stored in this run
    pub items_succeeded: u64,
    /// Items (or pages) skipped after a terminal failure in this run
    pub items_failed: u64,
    /// Documents written to the sink in this run
    pub documents_written: u64,
    /// Index the run resumed from
    pub resumed_from: usize,
    /// Whether a completed phase was demoted because its data was missing
    pub healed: bool,
    /// Batch size in effect at the end (chunk mode)
    pub batch_size: Option<usize>,
}

impl PhaseReport {
    pub(crate) fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            outcome: PhaseOutcome::Completed,
            status: PhaseStatus::InProgress,
            items_succeeded: 0,
            items_failed: 0,
            documents_written: 0,
            resumed_from: 0,
            healed: false,
            batch_size: None,
        }
    }

    /// Whether the run was cut short by a shutdown request
    pub fn interrupted(&self) -> bool {
        self.outcome == PhaseOutcome::Interrupted
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {:?} ({} succeeded, {} failed, {} documents)",
            self.phase,
            self.outcome,
            self.items_succeeded,
            self.items_failed,
            self.documents_written
        );
        if self.resumed_from > 0 {
            line.push_str(&format!(", resumed at #{}", self.resumed_from));
        }
        if self.healed {
            line.push_str(", re-run after missing data");
        }
        if let Some(size) = self.batch_size {
            line.push_str(&format!(", batch size {size}"));
        }
        line
    }
}
