//! Resume capability for batch phases
//!
//! Provides versioned checkpoints with atomic writes and file locking.

pub mod checkpoint;
pub mod lock;
pub mod state;

pub use checkpoint::{Checkpoint, PhaseProgress, PhaseStatus, SCHEMA_VERSION};
pub use lock::ResumeLock;
pub use state::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, ResumeError};
