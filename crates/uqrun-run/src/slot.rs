use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uqrun_core::{ErrorInfo, OutputMap, ParameterPoint, UqError};
use uqrun_store::FailureKind;

/// Lifecycle state of a [`RunSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Created,
    Submitted,
    Succeeded,
    Failed,
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotState::Succeeded | SlotState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Created => "created",
            SlotState::Submitted => "submitted",
            SlotState::Succeeded => "succeeded",
            SlotState::Failed => "failed",
        }
    }

    fn allows(&self, next: SlotState) -> bool {
        matches!(
            (self, next),
            (SlotState::Created, SlotState::Submitted)
                | (SlotState::Created, SlotState::Failed)
                | (SlotState::Submitted, SlotState::Succeeded)
                | (SlotState::Submitted, SlotState::Failed)
        )
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a submitted run ended unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum RunFailure {
    NonZeroExit(i32),
    Signal(i32),
    /// In-process model returned an error.
    Model(String),
    /// Batch job ended in a non-success scheduler state.
    JobFailed(String),
    LostJob(String),
    Cancelled,
    Timeout,
    PollError(String),
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::NonZeroExit(code) => write!(f, "exited with status {code}"),
            RunFailure::Signal(sig) => write!(f, "terminated by signal {sig}"),
            RunFailure::Model(msg) => write!(f, "model error: {msg}"),
            RunFailure::JobFailed(state) => write!(f, "batch job ended in state {state}"),
            RunFailure::LostJob(job) => write!(f, "lost job {job}"),
            RunFailure::Cancelled => f.write_str("cancelled"),
            RunFailure::Timeout => f.write_str("timeout"),
            RunFailure::PollError(msg) => write!(f, "status query failed: {msg}"),
        }
    }
}

/// Cause passed to `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Stopped,
    Timeout,
}

impl From<CancelCause> for RunFailure {
    fn from(cause: CancelCause) -> Self {
        match cause {
            CancelCause::Stopped => RunFailure::Cancelled,
            CancelCause::Timeout => RunFailure::Timeout,
        }
    }
}

/// Raw output of a successful run, before collection.
#[derive(Debug, Clone, PartialEq)]
pub enum RunPayload {
    InProcess(OutputMap),
    Directory(PathBuf),
}

/// Failure attached to a failed slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The run directory could not be materialized.
    Materialize(UqError),
    /// The backend refused or could not start the submission.
    Submit(UqError),
    Run(RunFailure),
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::Materialize(_) => FailureKind::Template,
            Failure::Submit(_) => FailureKind::Backend,
            Failure::Run(_) => FailureKind::Run,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Failure::Materialize(err) | Failure::Submit(err) => err.to_string(),
            Failure::Run(failure) => failure.to_string(),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: SlotState,
    pub at: DateTime<Utc>,
}

/// Per-point bookkeeping record owned by the dispatcher.
///
/// States move `created -> submitted -> {succeeded | failed}`, with
/// `created -> failed` for points that never got submitted. Terminal states
/// are final; retrying a point means allocating a fresh slot.
#[derive(Debug, Clone)]
pub struct RunSlot {
    point: Arc<ParameterPoint>,
    run_dir: Option<PathBuf>,
    state: SlotState,
    history: Vec<Transition>,
    payload: Option<RunPayload>,
    failure: Option<Failure>,
}

impl RunSlot {
    pub fn new(point: Arc<ParameterPoint>) -> Self {
        Self {
            point,
            run_dir: None,
            state: SlotState::Created,
            history: vec![Transition {
                state: SlotState::Created,
                at: Utc::now(),
            }],
            payload: None,
            failure: None,
        }
    }

    pub fn index(&self) -> usize {
        self.point.index
    }

    pub fn point(&self) -> &ParameterPoint {
        &self.point
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    /// Records the materialized run directory. Only valid before submission.
    pub fn set_run_dir(&mut self, dir: PathBuf) -> Result<(), UqError> {
        if self.state != SlotState::Created {
            return Err(self.rejected("set_run_dir"));
        }
        self.run_dir = Some(dir);
        Ok(())
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn payload(&self) -> Option<&RunPayload> {
        self.payload.as_ref()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn mark_submitted(&mut self) -> Result<(), UqError> {
        self.transition(SlotState::Submitted)
    }

    pub fn succeed(&mut self, payload: RunPayload) -> Result<(), UqError> {
        self.transition(SlotState::Succeeded)?;
        self.payload = Some(payload);
        Ok(())
    }

    pub fn fail(&mut self, failure: Failure) -> Result<(), UqError> {
        self.transition(SlotState::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Forces a submitted slot into `failed` with the cancellation cause.
    pub fn cancel(&mut self, cause: CancelCause) -> Result<(), UqError> {
        if self.state != SlotState::Submitted {
            return Err(self.rejected("cancel"));
        }
        self.fail(Failure::Run(cause.into()))
    }

    fn transition(&mut self, next: SlotState) -> Result<(), UqError> {
        if !self.state.allows(next) {
            return Err(self.rejected(next.as_str()));
        }
        self.state = next;
        self.history.push(Transition {
            state: next,
            at: Utc::now(),
        });
        Ok(())
    }

    fn rejected(&self, action: &str) -> UqError {
        UqError::Run(
            ErrorInfo::new("slot.invalid_transition", "transition not allowed from current state")
                .with_context("index", self.index().to_string())
                .with_context("state", self.state.as_str())
                .with_context("requested", action),
        )
    }
}
