//! Operations: one component, one phase, one action.
//!
//! The action-list builder turns each selected component into operations,
//! once per phase. An [`Action`] carries all three phase behaviours and an
//! [`Operation`] binds it to the single phase it was built for. State recorded
//! during capture only reaches a later revert if the builder hands out the
//! same action for that component in both phases.

use crate::types::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by an action itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The effect could not be carried out
    #[error("{0}")]
    Failed(String),

    /// The action stopped on its own, e.g. after noticing a cancel request
    #[error("aborted: {0}")]
    Aborted(String),
}

impl ActionError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// The side effects of installing one component.
///
/// Implementations must be safe to call from worker threads. Each method runs
/// to completion; there is no timeout at this layer.
pub trait Action: Send + Sync {
    /// Record whatever a later [`revert`](Action::revert) needs.
    fn capture_state(&self) -> Result<(), ActionError> {
        Ok(())
    }

    fn apply(&self) -> Result<(), ActionError>;

    fn revert(&self) -> Result<(), ActionError>;
}

/// An action bound to a component and a phase.
#[derive(Clone)]
pub struct Operation {
    component: String,
    phase: Phase,
    action: Arc<dyn Action>,
}

impl Operation {
    pub fn new(component: impl Into<String>, phase: Phase, action: Arc<dyn Action>) -> Self {
        Self {
            component: component.into(),
            phase,
            action,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }

    /// Run the phase this operation was built for
    pub(crate) fn execute(&self) -> Result<(), ActionError> {
        match self.phase {
            Phase::CaptureState => self.action.capture_state(),
            Phase::Apply => self.action.apply(),
            Phase::Revert => self.action.revert(),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("component", &self.component)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// What happened to one operation in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OperationOutcome {
    Succeeded,
    /// The action reported a failure
    Failed(String),
    /// The action panicked or could not be run
    Faulted(String),
    /// Canceled before it started; the action never ran
    Canceled,
}

impl OperationOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed(reason) | Self::Faulted(reason) => Some(reason),
            Self::Canceled => Some("canceled before start"),
        }
    }
}

impl From<Result<(), ActionError>> for OperationOutcome {
    fn from(result: Result<(), ActionError>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}
