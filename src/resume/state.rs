//! Checkpoint persistence
//!
//! [`FileCheckpointStore`] writes atomically (temp file, fsync, rename, parent
//! fsync) under an advisory lock and migrates the legacy progress format on
//! load. [`MemoryCheckpointStore`] backs tests.

use super::checkpoint::{Checkpoint, PhaseProgress, PhaseStatus, SCHEMA_VERSION};
use fd_lock::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Label used in logs for the unversioned progress format
const LEGACY_SCHEMA: &str = "legacy";

/// Maximum allowed checkpoint file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Errors related to checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// Another process owns the checkpoint
    #[error("checkpoint {0} is in use by another process")]
    AlreadyOwned(String),
}

/// Durable checkpoint storage.
///
/// `save` must be durable before it returns: the runner relies on it to
/// never claim an item that is not in the sink.
pub trait CheckpointStore: Send + Sync {
    /// Load the stored checkpoint, `None` when nothing was saved yet
    fn load(&self) -> Result<Option<Checkpoint>, ResumeError>;

    /// Persist the checkpoint
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResumeError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// JSON checkpoint file on disk
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the checkpoint file if present
    pub fn remove(&self) -> Result<bool, ResumeError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Checkpoint removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ResumeError::IoError(e.to_string())),
        }
    }

    fn open_lock_file(&self) -> Result<std::fs::File, ResumeError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ResumeError::IoError(e.to_string()))?;
            }
        }
        let lock_path = self.path.with_extension("lock");
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, ResumeError> {
        debug!(path = %self.path.display(), "Loading checkpoint");

        if !self.path.exists() {
            debug!(path = %self.path.display(), "No checkpoint yet");
            return Ok(None);
        }

        let lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata =
            std::fs::metadata(&self.path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if contents.trim().is_empty() {
            warn!(path = %self.path.display(), "Checkpoint file is empty, starting fresh");
            return Ok(None);
        }

        let checkpoint = parse_checkpoint(&contents)?;
        info!(
            path = %self.path.display(),
            phases = checkpoint.phases().len(),
            schema_version = %checkpoint.schema_version(),
            "Checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResumeError> {
        debug!(
            path = %self.path.display(),
            phases = checkpoint.phases().len(),
            "Saving checkpoint"
        );

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;

        temp_file
            .persist(&self.path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        // The rename is only durable once the directory entry is synced
        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Decode a checkpoint document, migrating the legacy format.
pub fn parse_checkpoint(contents: &str) -> Result<Checkpoint, ResumeError> {
    let value: Value = serde_json::from_str(contents).map_err(|e| {
        warn!(error = %e, "Failed to deserialize checkpoint");
        ResumeError::DeserializationError(e.to_string())
    })?;

    let Value::Object(map) = value else {
        return Err(ResumeError::DeserializationError(
            "checkpoint must be a JSON object".to_string(),
        ));
    };

    match map.get("schema_version") {
        Some(Value::String(version)) if version == SCHEMA_VERSION => {
            serde_json::from_value(Value::Object(map))
                .map_err(|e| ResumeError::DeserializationError(e.to_string()))
        }
        Some(other) => {
            let found = match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            warn!(
                found_version = %found,
                expected_version = SCHEMA_VERSION,
                "Checkpoint schema version mismatch"
            );
            Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found,
            })
        }
        None => {
            info!(
                found_version = LEGACY_SCHEMA,
                target_version = SCHEMA_VERSION,
                "Migrating legacy progress file"
            );
            migrate_legacy(map)
        }
    }
}

/// Convert `{phase: {completed, last_processed, batch_size}}` into phases.
fn migrate_legacy(map: Map<String, Value>) -> Result<Checkpoint, ResumeError> {
    let mut phases = BTreeMap::new();

    for (name, entry) in map {
        let Value::Object(entry) = entry else {
            return Err(ResumeError::DeserializationError(format!(
                "legacy phase '{name}' is not an object"
            )));
        };

        let completed = entry
            .get("completed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let last_processed = match entry.get("last_processed") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        let batch_size = entry
            .get("batch_size")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0);

        let status = if completed {
            PhaseStatus::Completed
        } else if last_processed.is_some() {
            PhaseStatus::InProgress
        } else {
            PhaseStatus::NotStarted
        };

        debug!(phase = %name, status = %status, "Migrated legacy phase");
        phases.insert(name, PhaseProgress::from_parts(status, last_processed, batch_size));
    }

    let mut checkpoint = Checkpoint::from_phases(phases);
    checkpoint.set_schema_version(SCHEMA_VERSION);
    info!(
        old_version = LEGACY_SCHEMA,
        new_version = SCHEMA_VERSION,
        phases = checkpoint.phases().len(),
        "Migrated checkpoint schema"
    );
    Ok(checkpoint)
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<MemoryStoreState>,
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    checkpoint: Option<Checkpoint>,
    saves: u64,
    failures_remaining: u32,
}

impl MemoryCheckpointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with a checkpoint
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        let store = Self::new();
        store.lock().checkpoint = Some(checkpoint);
        store
    }

    /// Make the next `count` saves fail
    pub fn fail_next_saves(&self, count: u32) {
        self.lock().failures_remaining = count;
    }

    /// Successful saves so far
    pub fn save_count(&self) -> u64 {
        self.lock().saves
    }

    /// Last saved checkpoint
    pub fn snapshot(&self) -> Option<Checkpoint> {
        self.lock().checkpoint.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, ResumeError> {
        Ok(self.lock().checkpoint.clone())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResumeError> {
        let mut state = self.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ResumeError::IoError("injected save failure".to_string()));
        }
        state.checkpoint = Some(checkpoint.clone());
        state.saves += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
