//! Run results and the final install report.
//!
//! The report is the only channel through which step failures reach the
//! caller. It always holds one `RunResult` per declared step, in declared
//! order, so an operator can see exactly where a partial run stopped.

use crate::install_state::RunState;
use crate::types::{Category, StepStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub step_name: String,
    /// Exit code; `None` if the step never ran, could not be spawned, timed
    /// out, or was killed by a signal
    pub exit_status: Option<i32>,
    /// stdout + stderr, credential masked. Empty for not-run steps.
    pub captured_output: String,
    /// Derived: `exit_status == Some(0)`
    pub succeeded: bool,
    pub status: StepStatus,
    /// Diagnostics for failures that are not a plain exit code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub critical: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl RunResult {
    /// Result for a step that was never started
    pub fn not_run(step_name: impl Into<String>, critical: bool) -> Self {
        Self {
            step_name: step_name.into(),
            exit_status: None,
            captured_output: String::new(),
            succeeded: false,
            status: StepStatus::NotRun,
            reason: None,
            critical,
            duration: Duration::ZERO,
        }
    }

    /// Result for a step that ran (or tried to)
    pub fn finished(
        step_name: impl Into<String>,
        critical: bool,
        exit_status: Option<i32>,
        captured_output: String,
        reason: Option<String>,
        duration: Duration,
    ) -> Self {
        let succeeded = exit_status == Some(0);
        let status = match (succeeded, critical) {
            (true, _) => StepStatus::Succeeded,
            (false, true) => StepStatus::FailedAborted,
            (false, false) => StepStatus::FailedNonCritical,
        };
        Self {
            step_name: step_name.into(),
            exit_status,
            captured_output,
            succeeded,
            status,
            reason,
            critical,
            duration,
        }
    }
}

/// Aggregate outcome of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub category: Category,
    pub results: Vec<RunResult>,
    /// True iff every critical step succeeded
    pub succeeded: bool,
    pub final_state: RunState,
    /// Label -> version string, sentinels included
    pub versions: BTreeMap<String, String>,
    pub dry_run: bool,
}

impl InstallReport {
    /// Assemble a report; `succeeded` is derived from the results
    pub fn new(
        category: Category,
        results: Vec<RunResult>,
        final_state: RunState,
        versions: BTreeMap<String, String>,
    ) -> Self {
        let succeeded = results
            .iter()
            .filter(|r| r.critical)
            .all(|r| r.succeeded);
        Self {
            category,
            results,
            succeeded,
            final_state,
            versions,
            dry_run: false,
        }
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| r.status.is_failure())
    }

    pub fn not_run_steps(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| r.status == StepStatus::NotRun)
    }

    pub fn result(&self, step_name: &str) -> Option<&RunResult> {
        self.results.iter().find(|r| r.step_name == step_name)
    }

    pub fn version(&self, label: &str) -> Option<&str> {
        self.versions.get(label).map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headline = if self.succeeded {
            "Update complete"
        } else {
            "Update failed"
        };
        let suffix = if self.dry_run { " (dry run)" } else { "" };
        writeln!(f, "{}{}", headline, suffix)?;
        writeln!(f, "Detected distro: {}", self.category.label())?;
        writeln!(f)?;

        for result in &self.results {
            write!(f, "  {} {:<20} {}", result.status.symbol(), result.step_name, result.status)?;
            if let Some(code) = result.exit_status.filter(|c| *c != 0) {
                write!(f, " (exit {})", code)?;
            }
            if let Some(reason) = &result.reason {
                write!(f, " ({})", reason)?;
            }
            writeln!(f)?;
        }

        if !self.versions.is_empty() {
            writeln!(f)?;
            for (label, version) in &self.versions {
                writeln!(f, "  {:<11} {}", format!("{}:", capitalize(label)), version)?;
            }
        }
        Ok(())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Read the first line of a version marker file.
///
/// Returns `sentinel` when the file is absent, unreadable, or has an empty
/// first line. Never fails: a missing marker is a normal outcome.
pub fn read_version(path: &Path, sentinel: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let first = content.lines().next().unwrap_or("").trim();
            if first.is_empty() {
                sentinel.to_string()
            } else {
                first.to_string()
            }
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "version file not readable");
            sentinel.to_string()
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ok(name: &str, critical: bool) -> RunResult {
        RunResult::finished(name, critical, Some(0), String::new(), None, Duration::ZERO)
    }

    fn failed(name: &str, critical: bool) -> RunResult {
        RunResult::finished(name, critical, Some(1), "boom".into(), None, Duration::ZERO)
    }

    #[test]
    fn test_finished_status_derivation() {
        assert_eq!(ok("a", true).status, StepStatus::Succeeded);
        assert_eq!(failed("a", true).status, StepStatus::FailedAborted);
        assert_eq!(failed("a", false).status, StepStatus::FailedNonCritical);

        let spawn = RunResult::finished(
            "a",
            false,
            None,
            String::new(),
            Some("spawn failure".into()),
            Duration::ZERO,
        );
        assert!(!spawn.succeeded);
        assert_eq!(spawn.status, StepStatus::FailedNonCritical);
    }

    #[test]
    fn test_not_run() {
        let r = RunResult::not_run("cleanup", false);
        assert_eq!(r.status, StepStatus::NotRun);
        assert!(r.exit_status.is_none());
        assert!(r.captured_output.is_empty());
    }

    #[test]
    fn test_report_success_ignores_non_critical_failures() {
        let report = InstallReport::new(
            Category::ArchLike,
            vec![ok("clone", true), failed("install", false), ok("cleanup", false)],
            RunState::Completed,
            BTreeMap::new(),
        );
        assert!(report.succeeded);
        assert_eq!(report.failed_steps().count(), 1);
    }

    #[test]
    fn test_report_fails_on_critical_failure() {
        let report = InstallReport::new(
            Category::ArchLike,
            vec![failed("clone", true), RunResult::not_run("build", true)],
            RunState::AbortedOnCriticalFailure,
            BTreeMap::new(),
        );
        assert!(!report.succeeded);
        assert_eq!(report.not_run_steps().count(), 1);
    }

    #[test]
    fn test_display_lists_steps_and_versions() {
        let mut versions = BTreeMap::new();
        versions.insert("current".to_string(), "not installed".to_string());
        versions.insert("installed".to_string(), "v1.06".to_string());
        let report = InstallReport::new(
            Category::Debian,
            vec![ok("clone", true), failed("extract-images", false)],
            RunState::Completed,
            versions,
        );
        let text = report.to_string();
        assert!(text.contains("Update complete"));
        assert!(text.contains("Debian"));
        assert!(text.contains("extract-images"));
        assert!(text.contains("(exit 1)"));
        assert!(text.contains("Current:"));
        assert!(text.contains("not installed"));
        assert!(text.contains("v1.06"));
    }

    #[test]
    fn test_json_output() {
        let report = InstallReport::new(
            Category::Ubuntu,
            vec![ok("clone", true)],
            RunState::Completed,
            BTreeMap::new(),
        );
        let json = report.to_json().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["succeeded"], true);
        assert_eq!(value["category"], "ubuntu");
        assert_eq!(value["results"][0]["status"], "succeeded");
        assert_eq!(value["final_state"]["state"], "completed");
    }

    #[test]
    fn test_read_version_missing_file() {
        let v = read_version(Path::new("/nonexistent/version.txt"), "not installed");
        assert_eq!(v, "not installed");
    }

    #[test]
    fn test_read_version_first_line() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "v1.06.1\nsecond line\n").expect("write");
        assert_eq!(read_version(file.path(), "unknown"), "v1.06.1");
    }

    #[test]
    fn test_read_version_empty_file() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        assert_eq!(read_version(file.path(), "unknown"), "unknown");
    }
}
