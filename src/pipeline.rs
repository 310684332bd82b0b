//! Pipeline data model
//!
//! A `Pipeline` is an ordered list of `Step`s plus the version files to read
//! around them. It is built once per invocation and never reordered.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// One external-tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    /// Human label shown in progress output and the report
    pub name: String,
    /// Opaque instruction for the `CommandRunner`
    pub command: String,
    /// Needs the elevation credential
    pub privileged: bool,
    /// Failure aborts every later step
    pub critical: bool,
    /// Overrides the orchestrator's default step timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Step {
    /// Unprivileged, critical step
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            privileged: false,
            critical: true,
            timeout: None,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Failure is logged and the pipeline continues
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// When a version file is read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "at", content = "step", rename_all = "snake_case")]
pub enum ReadPoint {
    /// Before the first step
    BeforeRun,
    /// Right after the named step finishes, whatever its outcome
    AfterStep(String),
    /// After the last step that ran
    AfterRun,
}

/// A version file read at a fixed point of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRead {
    /// Report key, e.g. "current", "downloaded", "installed"
    pub label: String,
    pub path: PathBuf,
    /// Value reported when the file is absent or empty
    pub sentinel: String,
    pub when: ReadPoint,
}

impl VersionRead {
    pub fn new(
        label: impl Into<String>,
        path: impl Into<PathBuf>,
        sentinel: impl Into<String>,
        when: ReadPoint,
    ) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
            sentinel: sentinel.into(),
            when,
        }
    }
}

/// Ordered sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    steps: Vec<Step>,
    version_reads: Vec<VersionRead>,
    requires_known_category: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step (builder style)
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn version_read(mut self, read: VersionRead) -> Self {
        self.version_reads.push(read);
        self
    }

    /// Refuse to run when the detected category is `Unknown`
    pub fn require_known_category(mut self) -> Self {
        self.requires_known_category = true;
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn version_reads(&self) -> &[VersionRead] {
        &self.version_reads
    }

    pub fn requires_known_category(&self) -> bool {
        self.requires_known_category
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True if any step needs the credential
    pub fn needs_credential(&self) -> bool {
        self.steps.iter().any(|s| s.privileged)
    }

    /// Version reads due at `point`
    pub fn version_reads_at<'a>(&'a self, point: &'a ReadPoint) -> impl Iterator<Item = &'a VersionRead> + 'a {
        self.version_reads.iter().filter(move |p| &p.when == point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pipeline {
        Pipeline::new()
            .step(Step::new("clone", "git clone x"))
            .step(Step::new("install", "cp a b").privileged().non_critical())
            .version_read(VersionRead::new("current", "/v", "not installed", ReadPoint::BeforeRun))
            .version_read(VersionRead::new(
                "downloaded",
                "/r/v",
                "unknown",
                ReadPoint::AfterStep("clone".to_string()),
            ))
    }

    #[test]
    fn test_step_defaults() {
        let step = Step::new("build", "make");
        assert!(step.critical);
        assert!(!step.privileged);
        assert!(step.timeout.is_none());
    }

    #[test]
    fn test_builder_preserves_order() {
        let pipeline = sample();
        let names: Vec<&str> = pipeline.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["clone", "install"]);
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_needs_credential() {
        assert!(sample().needs_credential());
        let plain = Pipeline::new().step(Step::new("a", "true"));
        assert!(!plain.needs_credential());
    }

    #[test]
    fn test_version_reads_at() {
        let pipeline = sample();
        let before: Vec<_> = pipeline.version_reads_at(&ReadPoint::BeforeRun).collect();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].label, "current");

        let after_clone = ReadPoint::AfterStep("clone".to_string());
        assert_eq!(pipeline.version_reads_at(&after_clone).count(), 1);
        assert_eq!(pipeline.version_reads_at(&ReadPoint::AfterRun).count(), 0);
    }

    #[test]
    fn test_require_known_category_flag() {
        assert!(!sample().requires_known_category());
        assert!(sample().require_known_category().requires_known_category());
    }
}
