//! Per-job execution state and its phase state machine.
//!
//! A job's phase only ever moves forward:
//! `Queued -> Executing -> {Completed | Failed}`. `Queued` may jump
//! straight to a terminal phase (fully cached workflows never report a
//! running node). Once terminal, no further transition is accepted.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of one submitted workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Executing,
    Completed,
    Failed,
}

impl Phase {
    /// `Completed` and `Failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `to` keeps the phase monotonic.
    ///
    /// Re-entering the current non-terminal phase is allowed (every
    /// running node reports `Executing` again).
    pub fn can_transition(self, to: Phase) -> bool {
        !self.is_terminal() && to.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Executing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// Mutable execution state owned by a single job's monitor.
///
/// Created once the render server has accepted the workflow, so the
/// `prompt_id` is fixed for the state's whole lifetime.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    prompt_id: String,
    started_at: Instant,
    last_progress_at: Instant,
    phase: Phase,
    collected_errors: Vec<String>,
}

impl ExecutionState {
    /// Start tracking a freshly queued prompt.
    pub fn new(prompt_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            prompt_id: prompt_id.into(),
            started_at: now,
            last_progress_at: now,
            phase: Phase::Queued,
            collected_errors: Vec::new(),
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn last_progress_at(&self) -> Instant {
        self.last_progress_at
    }

    pub fn errors(&self) -> &[String] {
        &self.collected_errors
    }

    /// Consume the state, returning the collected error messages.
    pub fn into_errors(self) -> Vec<String> {
        self.collected_errors
    }

    /// Time since monitoring started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the last stream activity.
    pub fn idle_for(&self) -> Duration {
        self.last_progress_at.elapsed()
    }

    /// Record stream activity.
    pub fn touch(&mut self) {
        self.last_progress_at = Instant::now();
    }

    /// A node of this prompt started running.
    pub fn mark_executing(&mut self) -> Result<(), CoreError> {
        self.advance(Phase::Executing)
    }

    /// The prompt left the execution pipeline without error.
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.advance(Phase::Completed)
    }

    /// The prompt failed. The error is only recorded if the transition is
    /// accepted.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.advance(Phase::Failed)?;
        self.collected_errors.push(error.into());
        Ok(())
    }

    /// Like [`fail`](Self::fail) but records several errors at once.
    pub fn fail_with(&mut self, errors: impl IntoIterator<Item = String>) -> Result<(), CoreError> {
        self.advance(Phase::Failed)?;
        self.collected_errors.extend(errors);
        Ok(())
    }

    fn advance(&mut self, to: Phase) -> Result<(), CoreError> {
        if !self.phase.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}
