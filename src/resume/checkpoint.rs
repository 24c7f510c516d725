//! Checkpoint types for resumable phases
//!
//! A [`Checkpoint`] holds one [`PhaseProgress`] per named phase. Phases move
//! `NotStarted → InProgress → Completed`; a completed phase whose data has
//! disappeared from the sink is demoted back to `InProgress`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current checkpoint schema version
pub const SCHEMA_VERSION: &str = "2.0.0";

/// Lifecycle of one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Never started
    #[default]
    NotStarted,
    /// Started and not finished (possibly interrupted)
    InProgress,
    /// Every item was attempted
    Completed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Progress of one phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_completed_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_size_hint: Option<usize>,
    #[serde(default)]
    items_succeeded: u64,
    #[serde(default)]
    items_failed: u64,
    #[serde(default)]
    updated_at: i64,
}

impl PhaseProgress {
    /// Fresh, not started phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a phase from stored fields (used by legacy migration)
    pub fn from_parts(
        status: PhaseStatus,
        last_completed_item: Option<String>,
        batch_size_hint: Option<usize>,
    ) -> Self {
        Self {
            status,
            last_completed_item,
            batch_size_hint,
            items_succeeded: 0,
            items_failed: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Current status
    pub fn status(&self) -> PhaseStatus {
        self.status
    }

    /// Whether the phase finished
    pub fn is_completed(&self) -> bool {
        self.status == PhaseStatus::Completed
    }

    /// Resume cursor: last item stored, or the next page cursor in page mode
    pub fn last_completed_item(&self) -> Option<&str> {
        self.last_completed_item.as_deref()
    }

    /// Persisted chunk size for chunked phases
    pub fn batch_size_hint(&self) -> Option<usize> {
        self.batch_size_hint
    }

    /// Items stored so far
    pub fn items_succeeded(&self) -> u64 {
        self.items_succeeded
    }

    /// Items skipped after a terminal failure
    pub fn items_failed(&self) -> u64 {
        self.items_failed
    }

    /// Last modification (unix millis)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Move a not started phase into progress
    pub fn start(&mut self) {
        if self.status == PhaseStatus::NotStarted {
            self.status = PhaseStatus::InProgress;
            self.touch();
        }
    }

    /// Record a stored item (or the last item of a stored chunk)
    pub fn record_success(&mut self, cursor: Option<&str>, items: u64) {
        if let Some(cursor) = cursor {
            self.last_completed_item = Some(cursor.to_string());
        }
        self.items_succeeded += items;
        self.touch();
    }

    /// Record items skipped after a terminal failure
    pub fn record_failure(&mut self, items: u64) {
        self.items_failed += items;
        self.touch();
    }

    /// Persist a new chunk size
    pub fn set_batch_size_hint(&mut self, batch_size: usize) {
        self.batch_size_hint = Some(batch_size);
        self.touch();
    }

    /// Mark every item as attempted
    pub fn mark_completed(&mut self) {
        self.status = PhaseStatus::Completed;
        self.touch();
    }

    /// Re-open a completed phase from the start
    pub fn demote(&mut self) {
        self.status = PhaseStatus::InProgress;
        self.last_completed_item = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

/// Durable record of batch progress across phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: String,
    #[serde(default)]
    phases: BTreeMap<String, PhaseProgress>,
    created_at: i64,
    updated_at: i64,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Checkpoint {
    /// Empty checkpoint at the current schema version
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            phases: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Checkpoint built from migrated phases
    pub fn from_phases(phases: BTreeMap<String, PhaseProgress>) -> Self {
        Self {
            phases,
            ..Self::new()
        }
    }

    /// Schema version of this checkpoint
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Creation time (unix millis)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last modification (unix millis)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// All phases in name order
    pub fn phases(&self) -> &BTreeMap<String, PhaseProgress> {
        &self.phases
    }

    /// Progress of one phase
    pub fn phase(&self, name: &str) -> Option<&PhaseProgress> {
        self.phases.get(name)
    }

    /// Mutable progress of one phase, created on first use
    pub fn phase_mut(&mut self, name: &str) -> &mut PhaseProgress {
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.phases.entry(name.to_string()).or_default()
    }

    /// Whether `name` is recorded as completed
    pub fn is_completed(&self, name: &str) -> bool {
        self.phase(name).is_some_and(PhaseProgress::is_completed)
    }

    /// Forget one phase; returns whether it existed
    pub fn reset_phase(&mut self, name: &str) -> bool {
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.phases.remove(name).is_some()
    }

    /// Forget every phase
    pub fn clear(&mut self) {
        self.phases.clear();
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    pub(crate) fn set_schema_version(&mut self, version: &str) {
        self.schema_version = version.to_string();
    }
}
