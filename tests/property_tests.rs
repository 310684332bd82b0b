//! Property-based tests for cmi-updater
//!
//! These tests verify:
//! - Pipeline outcome invariants for arbitrary critical/failure patterns
//! - Enum string round-trips (to_string → parse)
//! - Credential redaction and shell quoting

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Mutex;

use cmi_updater::command_runner::{CommandOutput, CommandRunner, ExecLimits, RunnerError};
use cmi_updater::credential::Credential;
use cmi_updater::distro::FixedDetector;
use cmi_updater::install_state::{RunState, RunStateMachine};
use cmi_updater::orchestrator::{InstallContext, InstallOrchestrator};
use cmi_updater::pipeline::{Pipeline, Step};
use cmi_updater::types::{Category, StepStatus};

// =============================================================================
// Pipeline Outcome Properties
// =============================================================================

/// Exits 1 for the listed commands, 0 otherwise, and records what ran
struct FailingRunner {
    failing: HashSet<String>,
    ran: Mutex<Vec<String>>,
}

impl FailingRunner {
    fn respond(&self, command: &str) -> Result<CommandOutput, RunnerError> {
        self.ran.lock().expect("ran lock").push(command.to_string());
        let code = if self.failing.contains(command) { 1 } else { 0 };
        Ok(CommandOutput::new(Some(code), ""))
    }
}

impl CommandRunner for FailingRunner {
    fn execute(&self, command: &str, _: &ExecLimits) -> Result<CommandOutput, RunnerError> {
        self.respond(command)
    }

    fn execute_privileged(
        &self,
        command: &str,
        _: &Credential,
        _: &ExecLimits,
    ) -> Result<CommandOutput, RunnerError> {
        self.respond(command)
    }
}

/// (critical, fails) per step
fn step_plan_strategy() -> impl Strategy<Value = Vec<(bool, bool)>> {
    prop::collection::vec((any::<bool>(), any::<bool>()), 0..12)
}

proptest! {
    /// Every step gets exactly one result, in order; nothing runs after the
    /// first critical failure; success means no critical failure ran
    #[test]
    fn pipeline_outcome_invariants(plan in step_plan_strategy()) {
        let pipeline = plan
            .iter()
            .enumerate()
            .fold(Pipeline::new(), |pipeline, (i, (critical, _))| {
                let step = Step::new(format!("step-{i}"), format!("cmd-{i}"));
                pipeline.step(if *critical { step } else { step.non_critical() })
            });
        let failing = plan
            .iter()
            .enumerate()
            .filter(|(_, (_, fails))| *fails)
            .map(|(i, _)| format!("cmd-{i}"))
            .collect();

        let runner = FailingRunner { failing, ran: Mutex::new(Vec::new()) };
        let orchestrator = InstallOrchestrator::new(runner, FixedDetector(Category::ArchLike));
        let mut ctx = InstallContext::new(Category::ArchLike);
        let report = orchestrator.run(&pipeline, &Credential::empty(), &mut ctx);

        prop_assert_eq!(report.results.len(), plan.len());
        for (i, result) in report.results.iter().enumerate() {
            prop_assert_eq!(&result.step_name, &format!("step-{i}"));
        }

        let first_critical_failure = plan.iter().position(|(critical, fails)| *critical && *fails);
        let expected_runs = first_critical_failure.map_or(plan.len(), |k| k + 1);
        prop_assert_eq!(orchestrator.runner().ran.lock().expect("ran lock").len(), expected_runs);

        for (i, result) in report.results.iter().enumerate() {
            if i >= expected_runs {
                prop_assert_eq!(result.status, StepStatus::NotRun);
                prop_assert!(result.exit_status.is_none());
            } else {
                prop_assert_ne!(result.status, StepStatus::NotRun);
                prop_assert_eq!(result.succeeded, !plan[i].1);
            }
        }

        prop_assert_eq!(report.succeeded, first_critical_failure.is_none());
        let expected_state = if first_critical_failure.is_some() {
            RunState::AbortedOnCriticalFailure
        } else {
            RunState::Completed
        };
        prop_assert_eq!(report.final_state, expected_state);
        prop_assert!(ctx.is_finished());
    }
}

// =============================================================================
// Run State Machine Properties
// =============================================================================

fn run_state_strategy() -> impl Strategy<Value = RunState> {
    prop_oneof![
        Just(RunState::Idle),
        Just(RunState::DetectingEnvironment),
        (0usize..4).prop_map(RunState::Running),
        Just(RunState::Completed),
        Just(RunState::AbortedOnCriticalFailure),
    ]
}

proptest! {
    /// Once terminal, the machine never moves again
    #[test]
    fn terminal_states_are_absorbing(targets in prop::collection::vec(run_state_strategy(), 0..20)) {
        let mut sm = RunStateMachine::new();
        let mut terminal_at: Option<RunState> = None;

        for target in targets {
            let before = sm.current();
            let outcome = sm.transition_to(target);
            if let Some(terminal) = terminal_at {
                prop_assert!(outcome.is_err());
                prop_assert_eq!(sm.current(), terminal);
            } else if outcome.is_ok() {
                prop_assert!(before.can_transition_to(target));
                prop_assert_eq!(sm.current(), target);
                if target.is_terminal() {
                    terminal_at = Some(target);
                }
            } else {
                prop_assert_eq!(sm.current(), before);
            }
        }
    }
}

// =============================================================================
// Enum Round-Trip Properties
// =============================================================================

fn category_strategy() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::ArchLike),
        Just(Category::Ubuntu),
        Just(Category::Debian),
        Just(Category::Unknown),
    ]
}

fn step_status_strategy() -> impl Strategy<Value = StepStatus> {
    prop_oneof![
        Just(StepStatus::Succeeded),
        Just(StepStatus::FailedNonCritical),
        Just(StepStatus::FailedAborted),
        Just(StepStatus::NotRun),
    ]
}

proptest! {
    /// Category: to_string → parse round-trip is identity
    #[test]
    fn category_roundtrip(category in category_strategy()) {
        let s = category.to_string();
        let parsed: Category = s.parse().expect("Should parse");
        prop_assert_eq!(category, parsed);
        prop_assert_eq!(s.clone(), s.to_lowercase());
    }

    /// StepStatus: to_string → parse round-trip is identity
    #[test]
    fn step_status_roundtrip(status in step_status_strategy()) {
        let parsed: StepStatus = status.to_string().parse().expect("Should parse");
        prop_assert_eq!(status, parsed);
        prop_assert!(!(status.is_success() && status.is_failure()));
    }

    /// os-release IDs outside the supported set are never guessed
    #[test]
    fn unsupported_os_ids_are_unknown(id in "[a-z][a-z0-9-]{0,15}") {
        prop_assume!(!["arch", "cachyos", "ubuntu", "debian"].contains(&id.as_str()));
        prop_assert_eq!(Category::from_os_id(&id), Category::Unknown);
    }
}

// =============================================================================
// Credential and Quoting Properties
// =============================================================================

proptest! {
    /// The secret never survives redaction, wherever it appears
    #[test]
    fn redaction_removes_every_occurrence(
        secret in "[a-zA-Z0-9!@#%^&]{4,16}",
        prefix in ".{0,20}",
        suffix in ".{0,20}",
        repeats in 1usize..4,
    ) {
        let credential = Credential::new(secret.clone());
        let text = format!("{prefix}{}{suffix}", secret.repeat(repeats));
        let redacted = credential.redact(&text);
        prop_assert!(!redacted.contains(&secret));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// bash sees exactly the original word after escaping
    #[test]
    fn shell_escape_survives_bash(word in "[^\\x00]{0,24}") {
        let escaped = cmi_updater::catalog::shell_escape(&word);
        let out = std::process::Command::new("bash")
            .arg("-c")
            .arg(format!("printf %s {}", escaped))
            .output()
            .expect("bash runs");
        prop_assert_eq!(String::from_utf8_lossy(&out.stdout).into_owned(), word);
    }
}
