//! Pre-flight sanity checks for the runtime environment
//!
//! Verifies, before any prompt is shown, that every external tool the update
//! pipeline shells out to is on `PATH`. `sudo` is only required when the
//! updater is not already running as root.

use crate::error::{Result, UpdaterError};
use crate::types::Category;

/// Tools every pipeline needs
const REQUIRED_BINARIES: &[&str] = &[
    "bash",  // Step execution
    "git",   // clone
    "make",  // build
    "unzip", // extract-images
];

/// Result of environment verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty()
    }
}

/// Check if a binary is available in PATH
pub fn binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Check if running as root (EUID 0)
pub fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Tools the pipeline shells out to, given whether we are root
pub fn required_binaries(is_root: bool) -> Vec<&'static str> {
    let mut required = REQUIRED_BINARIES.to_vec();
    if !is_root {
        required.push("sudo");
    }
    required
}

/// Check the environment with a custom lookup (used by tests)
pub fn verify_with<F>(is_root: bool, exists: F) -> SanityCheckResult
where
    F: Fn(&str) -> bool,
{
    let missing_binaries = required_binaries(is_root)
        .into_iter()
        .filter(|binary| !exists(binary))
        .map(str::to_string)
        .collect();

    SanityCheckResult {
        missing_binaries,
        is_root,
    }
}

/// Perform all sanity checks and return the result
pub fn verify_environment() -> SanityCheckResult {
    verify_with(is_running_as_root(), binary_exists)
}

/// Suggested install command for the missing tools
pub fn install_hint(category: Category, missing: &[String]) -> Option<String> {
    if missing.is_empty() {
        return None;
    }
    let packages = missing.join(" ");
    match category {
        Category::ArchLike => Some(format!("sudo pacman -S {}", packages)),
        Category::Ubuntu | Category::Debian => Some(format!("sudo apt install {}", packages)),
        Category::Unknown => None,
    }
}

/// Main entry point: verify environment and fail if checks fail
pub fn run_preflight_checks(category: Category) -> Result<SanityCheckResult> {
    tracing::debug!("Running pre-flight sanity checks...");

    let result = verify_environment();
    if !result.is_ok() {
        let mut message = format!("missing required tools: {}", result.missing_binaries.join(", "));
        if let Some(hint) = install_hint(category, &result.missing_binaries) {
            message.push_str(&format!(" (install with: {})", hint));
        }
        return Err(UpdaterError::preflight(message));
    }

    tracing::info!(root = result.is_root, "Pre-flight checks passed");
    Ok(result)
}
