//! Single-run guard.
//!
//! Two updaters running at once would clone into the same checkout and
//! delete each other's config directory. The whole run therefore holds an
//! advisory exclusive lock (`flock`) on a lock file; a second invocation
//! fails fast with `UpdaterError::Locked`.
//!
//! The lock file is never unlinked. Removing a still-locked file would let a
//! second process create a fresh inode at the same path and lock that one.

use crate::error::{Result, UpdaterError};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Held for the duration of a run; the lock is released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock at `path`, creating the file and its parent directory.
    ///
    /// # Errors
    ///
    /// `Locked` if another process holds it, `Io` if the file cannot be
    /// created.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        if fs2::FileExt::try_lock_exclusive(&file).is_err() {
            return Err(UpdaterError::Locked(path.display().to_string()));
        }

        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
