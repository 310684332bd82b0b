//! Installed and available versions, without running the update
//!
//! The installed version is the marker in the config directory. The
//! available one is read from a throwaway shallow clone, so it is correct
//! even though a finished update always removes its own checkout.

use crate::catalog::{self, DistroProfile, Layout, NOT_INSTALLED, UNKNOWN_VERSION};
use crate::command_runner::{CommandRunner, ExecLimits};
use crate::report::read_version;
use serde::Serialize;

/// What `versions` and the interactive menu show
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSummary {
    pub current: String,
    pub available: String,
}

/// Read the installed marker and fetch the upstream one through `runner`.
///
/// Any failure to fetch (no network, clone error, missing marker) reports
/// the available version as `unknown`.
pub fn check_versions<R: CommandRunner + ?Sized>(
    runner: &R,
    profile: &DistroProfile,
    layout: &Layout,
    limits: &ExecLimits,
) -> VersionSummary {
    VersionSummary {
        current: read_version(&layout.installed_version_file(), NOT_INSTALLED),
        available: fetch_available(runner, profile, layout, limits),
    }
}

fn fetch_available<R: CommandRunner + ?Sized>(
    runner: &R,
    profile: &DistroProfile,
    layout: &Layout,
    limits: &ExecLimits,
) -> String {
    let scratch = match tempfile::Builder::new().prefix("cmi-updater-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "cannot create scratch directory for version check");
            return UNKNOWN_VERSION.to_string();
        }
    };
    let target = scratch.path().join("src");

    match runner.execute(&catalog::shallow_clone_command(layout, &target), limits) {
        Ok(out) if out.success() => {
            read_version(&catalog::version_file_in(&target, profile), UNKNOWN_VERSION)
        }
        Ok(out) => {
            tracing::warn!(exit_status = ?out.exit_status, "shallow clone for version check failed");
            UNKNOWN_VERSION.to_string()
        }
        Err(e) => {
            tracing::warn!(error = %e, "shallow clone for version check failed");
            UNKNOWN_VERSION.to_string()
        }
    }
}
