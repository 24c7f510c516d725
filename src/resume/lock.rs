//! Single-owner lock for a checkpoint file
//!
//! Only one runner may drive a checkpoint at a time. The lock lives on
//! `<checkpoint>.owner`, separate from the `.lock` file the store takes
//! around each read and write, and is held until the [`ResumeLock`] drops.

use super::state::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive ownership of a checkpoint file
#[derive(Debug)]
pub struct ResumeLock {
    // The OS lock is released when the file handle closes
    _lock: RwLock<File>,
    path: PathBuf,
}

impl ResumeLock {
    /// Acquire ownership, waiting for the current owner to exit
    pub fn acquire(checkpoint_path: &Path) -> Result<Self, ResumeError> {
        Self::lock(checkpoint_path, true)
    }

    /// Acquire ownership or fail immediately with [`ResumeError::AlreadyOwned`]
    pub fn try_acquire(checkpoint_path: &Path) -> Result<Self, ResumeError> {
        Self::lock(checkpoint_path, false)
    }

    /// Path of the owner file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(checkpoint_path: &Path, blocking: bool) -> Result<Self, ResumeError> {
        if let Some(parent) = checkpoint_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ResumeError::IoError(e.to_string()))?;
            }
        }

        let path = checkpoint_path.with_extension("owner");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open owner file: {e}")))?;

        let mut lock = RwLock::new(file);
        {
            let guard = if blocking {
                lock.write()
                    .map_err(|e| ResumeError::LockError(format!("Failed to acquire lock: {e}")))?
            } else {
                lock.try_write().map_err(|e| match e.kind() {
                    std::io::ErrorKind::WouldBlock => {
                        ResumeError::AlreadyOwned(checkpoint_path.display().to_string())
                    }
                    _ => ResumeError::LockError(format!("Failed to acquire lock: {e}")),
                })?
            };
            // Keep the OS lock past the guard; closing the file releases it
            std::mem::forget(guard);
        }

        debug!(path = %path.display(), "Checkpoint ownership acquired");
        Ok(Self { _lock: lock, path })
    }
}
