//! Run State Machine
//!
//! The orchestrator's authoritative record of where a run is. Transitions are
//! validated, so a step cannot be skipped or run twice and a finished run
//! cannot be restarted.
//!
//! # State Flow
//!
//! ```text
//! Idle
//!   ↓
//! DetectingEnvironment
//!   ↓
//! Running(0) → Running(1) → … → Running(n-1)
//!   ↓                               ↓
//! AbortedOnCriticalFailure      Completed
//! ```
//!
//! An empty pipeline goes straight from `DetectingEnvironment` to `Completed`,
//! and a run cancelled before its first step goes straight to
//! `AbortedOnCriticalFailure`.
//! There is no retry state.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Position of a run in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    DetectingEnvironment,
    /// Executing the step at this index
    Running(usize),
    /// Every step ran (non-critical failures allowed)
    Completed,
    /// A critical step failed or the run was cancelled
    AbortedOnCriticalFailure,
}

impl RunState {
    /// Returns true for `Completed` and `AbortedOnCriticalFailure`
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::AbortedOnCriticalFailure)
    }

    /// Returns true if `to` is a legal successor of `self`
    pub const fn can_transition_to(self, to: RunState) -> bool {
        match (self, to) {
            (Self::Idle, Self::DetectingEnvironment) => true,
            (Self::DetectingEnvironment, Self::Running(0)) => true,
            (Self::DetectingEnvironment, Self::Completed) => true,
            (Self::DetectingEnvironment, Self::AbortedOnCriticalFailure) => true,
            (Self::Running(i), Self::Running(j)) => j == i + 1,
            (Self::Running(_), Self::Completed) => true,
            (Self::Running(_), Self::AbortedOnCriticalFailure) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::DetectingEnvironment => write!(f, "detecting environment"),
            Self::Running(i) => write!(f, "running step {}", i + 1),
            Self::Completed => write!(f, "completed"),
            Self::AbortedOnCriticalFailure => write!(f, "aborted on critical failure"),
        }
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot transition from terminal state '{from}'")]
    FromTerminalState { from: RunState },

    #[error("Invalid transition from '{from}' to '{to}'")]
    Invalid { from: RunState, to: RunState },
}

/// Validated holder of the current `RunState`
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    current: RunState,
    /// Every state entered, with a unix timestamp
    history: Vec<(RunState, u64)>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunState::Idle,
            history: Vec::new(),
        }
    }

    #[inline]
    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn history(&self) -> &[(RunState, u64)] {
        &self.history
    }

    /// Move to `target` if the transition is legal
    pub fn transition_to(&mut self, target: RunState) -> Result<RunState, TransitionError> {
        if self.current.is_terminal() {
            return Err(TransitionError::FromTerminalState { from: self.current });
        }
        if !self.current.can_transition_to(target) {
            return Err(TransitionError::Invalid {
                from: self.current,
                to: target,
            });
        }

        tracing::debug!(from = %self.current, to = %target, "run state transition");
        self.record(target);
        self.current = target;
        Ok(target)
    }

    /// `Idle -> DetectingEnvironment`
    pub fn begin_detection(&mut self) -> Result<RunState, TransitionError> {
        self.transition_to(RunState::DetectingEnvironment)
    }

    /// Enter `Running(index)`, the only legal next step index
    pub fn start_step(&mut self, index: usize) -> Result<RunState, TransitionError> {
        self.transition_to(RunState::Running(index))
    }

    pub fn complete(&mut self) -> Result<RunState, TransitionError> {
        self.transition_to(RunState::Completed)
    }

    pub fn abort(&mut self) -> Result<RunState, TransitionError> {
        self.transition_to(RunState::AbortedOnCriticalFailure)
    }

    fn record(&mut self, state: RunState) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.history.push((state, timestamp));
    }
}

impl From<TransitionError> for crate::error::UpdaterError {
    fn from(err: TransitionError) -> Self {
        crate::error::UpdaterError::transition(err.to_string())
    }
}
