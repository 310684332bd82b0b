//! Install orchestrator
//!
//! Runs a `Pipeline` strictly in order through a `CommandRunner`, records one
//! `RunResult` per declared step and assembles the `InstallReport`.
//!
//! # Failure semantics
//!
//! - A failed critical step is recorded as `FailedAborted`; every later step
//!   is `NotRun`
//! - A failed non-critical step is recorded as `FailedNonCritical` and the
//!   pipeline continues
//! - Runner errors (spawn failure, timeout, cancellation) are failed steps
//!   with a `reason`, never an `Err`
//!
//! Only problems detected before the first step (unsupported environment)
//! are returned as `UpdaterError`.
//!
//! # Threading
//!
//! The orchestrator is designed to run on one worker thread while a progress
//! indicator polls the context's `finished` flag on another. The worker is
//! the only writer of that flag.

use crate::command_runner::{CancelToken, CommandRunner, ExecLimits, RunnerError};
use crate::credential::Credential;
use crate::distro::DistroDetector;
use crate::error::{Result, UpdaterError};
use crate::install_state::{RunState, RunStateMachine};
use crate::pipeline::{Pipeline, ReadPoint, Step};
use crate::report::{self, InstallReport, RunResult};
use crate::types::{Category, StepStatus};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

/// Progress notifications emitted by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    Started {
        index: usize,
        total: usize,
        name: String,
    },
    Finished {
        index: usize,
        total: usize,
        name: String,
        status: StepStatus,
    },
}

/// Per-run state shared between the worker and its observers
#[derive(Debug)]
pub struct InstallContext {
    category: Category,
    versions: BTreeMap<String, String>,
    finished: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl Default for InstallContext {
    fn default() -> Self {
        Self::new(Category::Unknown)
    }
}

impl InstallContext {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            versions: BTreeMap::new(),
            finished: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancel token (e.g. the signal handler's)
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn versions(&self) -> &BTreeMap<String, String> {
        &self.versions
    }

    /// Handle for the progress indicator
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Serial pipeline executor
pub struct InstallOrchestrator<R, D> {
    runner: R,
    detector: D,
    /// Applied to steps without their own timeout
    step_timeout: Option<Duration>,
    events: Option<Sender<StepEvent>>,
    dry_run: bool,
}

impl<R: CommandRunner, D: DistroDetector> InstallOrchestrator<R, D> {
    pub fn new(runner: R, detector: D) -> Self {
        Self {
            runner,
            detector,
            step_timeout: None,
            events: None,
            dry_run: false,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Send a `StepEvent` around every step
    pub fn with_events(mut self, events: Sender<StepEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Mark reports as produced by a dry run
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Ask the detector for the current environment category
    pub fn detect_environment(&self) -> Category {
        self.detector.detect()
    }

    /// First line of a version file, or `sentinel` if absent or empty
    pub fn read_version(&self, path: &Path, sentinel: &str) -> String {
        report::read_version(path, sentinel)
    }

    /// Detect, validate and run.
    ///
    /// The detected category is stored in `ctx`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the environment is `Unknown` and the pipeline
    /// requires a known category. No step has run in that case, and the
    /// `finished` flag is still set so observers do not wait forever.
    pub fn execute(
        &self,
        pipeline: &Pipeline,
        credential: &Credential,
        ctx: &mut InstallContext,
    ) -> Result<InstallReport> {
        let mut sm = RunStateMachine::new();
        sm.begin_detection()?;

        ctx.category = self.detect_environment();
        if pipeline.requires_known_category() && !ctx.category.is_known() {
            ctx.mark_finished();
            tracing::error!("environment not recognised, refusing to run any step");
            return Err(UpdaterError::configuration(
                "could not detect a supported distribution from os-release",
            ));
        }

        Ok(self.run_steps(pipeline, credential, ctx, sm))
    }

    /// Run every step of `pipeline` for the category already in `ctx`.
    ///
    /// Always returns a report with one result per declared step and sets the
    /// `finished` flag before returning.
    pub fn run(
        &self,
        pipeline: &Pipeline,
        credential: &Credential,
        ctx: &mut InstallContext,
    ) -> InstallReport {
        let mut sm = RunStateMachine::new();
        transition(sm.begin_detection());
        self.run_steps(pipeline, credential, ctx, sm)
    }

    fn run_steps(
        &self,
        pipeline: &Pipeline,
        credential: &Credential,
        ctx: &mut InstallContext,
        mut sm: RunStateMachine,
    ) -> InstallReport {
        let total = pipeline.len();
        tracing::debug!(category = %ctx.category, steps = total, "starting pipeline");

        self.read_versions(pipeline, &ReadPoint::BeforeRun, ctx);

        let mut results = Vec::with_capacity(total);
        let mut aborted = false;

        for (index, step) in pipeline.steps().iter().enumerate() {
            if !aborted && ctx.cancel.is_cancelled() {
                tracing::warn!(step = %step.name, "run cancelled, skipping remaining steps");
                aborted = true;
            }
            if aborted {
                results.push(RunResult::not_run(&step.name, step.critical));
                continue;
            }

            transition(sm.start_step(index));
            self.emit(StepEvent::Started {
                index,
                total,
                name: step.name.clone(),
            });

            let result = self.run_step(index, step, credential, &ctx.cancel);

            self.emit(StepEvent::Finished {
                index,
                total,
                name: step.name.clone(),
                status: result.status,
            });
            self.read_versions(pipeline, &ReadPoint::AfterStep(step.name.clone()), ctx);

            if !result.succeeded {
                if step.critical {
                    tracing::error!(step = %step.name, "critical step failed, aborting pipeline");
                    aborted = true;
                } else {
                    tracing::warn!(step = %step.name, "non-critical step failed, continuing");
                }
            }
            results.push(result);
        }

        self.read_versions(pipeline, &ReadPoint::AfterRun, ctx);

        let final_state = if aborted {
            transition(sm.abort());
            RunState::AbortedOnCriticalFailure
        } else {
            transition(sm.complete());
            RunState::Completed
        };
        tracing::debug!(history = ?sm.history(), "run state history");

        let mut report = InstallReport::new(ctx.category, results, final_state, ctx.versions.clone());
        report.dry_run = self.dry_run;

        tracing::debug!(
            succeeded = report.succeeded,
            final_state = %final_state,
            "pipeline finished"
        );
        ctx.mark_finished();
        report
    }

    fn run_step(
        &self,
        index: usize,
        step: &Step,
        credential: &Credential,
        cancel: &CancelToken,
    ) -> RunResult {
        let limits = ExecLimits {
            timeout: step.timeout.or(self.step_timeout),
            cancel: cancel.clone(),
        };
        tracing::debug!(
            index,
            step = %step.name,
            privileged = step.privileged,
            critical = step.critical,
            "running step"
        );

        let started = Instant::now();
        let outcome = if step.privileged {
            self.runner
                .execute_privileged(&step.command, credential, &limits)
        } else {
            self.runner.execute(&step.command, &limits)
        };
        let duration = started.elapsed();

        let (exit_status, output, reason) = match outcome {
            Ok(out) => {
                let reason = out
                    .exit_status
                    .is_none()
                    .then(|| "terminated by signal".to_string());
                (out.exit_status, credential.redact(&out.output), reason)
            }
            Err(e) => (None, String::new(), Some(describe(&e, credential))),
        };

        let result = RunResult::finished(
            &step.name,
            step.critical,
            exit_status,
            output,
            reason,
            duration,
        );

        if result.succeeded {
            tracing::debug!(step = %step.name, ?duration, "step succeeded");
        } else {
            tracing::warn!(
                step = %step.name,
                exit_status = ?result.exit_status,
                reason = result.reason.as_deref().unwrap_or(""),
                "step failed"
            );
        }
        if !result.captured_output.is_empty() {
            tracing::debug!(step = %step.name, output = %result.captured_output, "step output");
        }
        result
    }

    fn read_versions(&self, pipeline: &Pipeline, point: &ReadPoint, ctx: &mut InstallContext) {
        for read in pipeline.version_reads_at(point) {
            let version = self.read_version(&read.path, &read.sentinel);
            tracing::debug!(label = %read.label, %version, "version read");
            ctx.versions.insert(read.label.clone(), version);
        }
    }

    fn emit(&self, event: StepEvent) {
        if let Some(events) = &self.events {
            // The receiver going away only means nobody is watching
            let _ = events.send(event);
        }
    }
}

fn describe(err: &RunnerError, credential: &Credential) -> String {
    credential.redact(&format!("{}: {}", err.kind(), err))
}

fn transition<E: std::fmt::Display>(outcome: std::result::Result<RunState, E>) {
    if let Err(e) = outcome {
        tracing::error!(error = %e, "run state machine rejected transition");
    }
}
