//! Per-resource advisory locks.
//!
//! Mutating transitions of one resource are serialized across concurrent
//! invocations with an exclusive `flock` on `<root>/.locks/<id>.lock`.
//! The lock is released when the guard is dropped.
//!
//! Locks are per open file description: acquiring the same resource twice
//! from one process through two guards blocks forever.

use crate::error::{Result, SpmiError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An acquired resource lock.
#[derive(Debug)]
pub struct ResourceLock {
    file: File,
    lock_path: PathBuf,
}

impl ResourceLock {
    /// Block until the lock for `id` in `locks_dir` is held.
    pub fn acquire(locks_dir: &Path, id: &str) -> Result<Self> {
        let lock_path = locks_dir.join(format!("{}.lock", id));
        let lock_error = |e: std::io::Error| SpmiError::Lock {
            path: lock_path.clone(),
            message: e.to_string(),
        };

        fs::create_dir_all(locks_dir).map_err(lock_error)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(lock_error)?;

        lock_file.lock_exclusive().map_err(lock_error)?;
        debug!(lock_path = %lock_path.display(), "Acquired resource lock");

        Ok(Self {
            file: lock_file,
            lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(lock_path = %self.lock_path.display(), "Failed to unlock: {}", e);
        } else {
            debug!(lock_path = %self.lock_path.display(), "Released resource lock");
        }
    }
}
