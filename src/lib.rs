//! cmi-updater library
//!
//! Orchestrates the update of the multi-distro ISO creator: detect the
//! distribution, run a fixed pipeline of (possibly privileged) external
//! commands, and report the outcome of every step.

pub mod catalog;
pub mod cli;
pub mod command_runner;
pub mod config_file;
pub mod credential;
pub mod distro;
pub mod error;
pub mod install_state;
pub mod lock;
pub mod orchestrator;
pub mod pipeline;
pub mod process_guard;
pub mod progress;
pub mod report;
pub mod sanity;
pub mod types;
pub mod ui;
pub mod versions;

// Re-export main types for convenience
pub use catalog::{DistroProfile, Layout, pipeline_for, profile_for};
pub use command_runner::{
    CancelToken, CommandOutput, CommandRunner, DryRunRunner, ExecLimits, RunnerError, ShellRunner,
};
pub use config_file::UpdaterConfig;
pub use credential::Credential;
pub use distro::{DistroDetector, FixedDetector, OsReleaseDetector};
pub use error::{Result, UpdaterError};
pub use install_state::{RunState, RunStateMachine, TransitionError};
pub use lock::RunLock;
pub use orchestrator::{InstallContext, InstallOrchestrator, StepEvent};
pub use pipeline::{Pipeline, ReadPoint, Step, VersionRead};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use progress::ProgressIndicator;
pub use report::{InstallReport, RunResult, read_version};
pub use types::{Category, StepStatus};
pub use ui::{CrosstermUi, TerminalUI};
pub use versions::{VersionSummary, check_versions};
