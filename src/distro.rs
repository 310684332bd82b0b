//! Distribution detection
//!
//! Reads the `ID=` line of the os-release file with plain std file IO (no
//! `cat | grep | cut` pipeline). Detection never fails: an unreadable file or
//! a missing key yields `Category::Unknown`, and the orchestrator decides
//! whether that is fatal.

use crate::types::Category;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default location of the environment-description file
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Source of the operating-environment category
pub trait DistroDetector: Send + Sync {
    fn detect(&self) -> Category;
}

/// Detector backed by an os-release file
#[derive(Debug, Clone)]
pub struct OsReleaseDetector {
    path: PathBuf,
}

impl Default for OsReleaseDetector {
    fn default() -> Self {
        Self::new(OS_RELEASE_PATH)
    }
}

impl OsReleaseDetector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DistroDetector for OsReleaseDetector {
    fn detect(&self) -> Category {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let category = parse_os_release(&content);
                tracing::info!(path = %self.path.display(), %category, "distribution detected");
                category
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot read os-release");
                Category::Unknown
            }
        }
    }
}

/// A detector that always reports the same category
#[derive(Debug, Clone, Copy)]
pub struct FixedDetector(pub Category);

impl DistroDetector for FixedDetector {
    fn detect(&self) -> Category {
        self.0
    }
}

/// Extract the category from os-release content.
///
/// Only the first `ID=` line counts. `ID_LIKE` is ignored.
pub fn parse_os_release(content: &str) -> Category {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("ID="))
        .map(Category::from_os_id)
        .unwrap_or(Category::Unknown)
}

impl fmt::Display for OsReleaseDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os-release ({})", self.path.display())
    }
}
