//! Transaction State Machine
//!
//! Tracks where a transaction is and refuses transitions that would skip a
//! phase. The coordinator is the only writer; reports carry the final stage.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted ──────────┐
//!     ↓                 │
//! CapturingState ────→ Canceled
//!     ↓
//! Applying ──────→ RollingBack
//!     ↓                ↓
//! Committed        RolledBack
//! ```
//!
//! `Canceled` is only reachable before anything has been applied.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transaction stages in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransactionStage {
    /// Nothing has run yet
    NotStarted = 0,

    /// Recording pre-change state for every selected component
    CapturingState = 1,

    /// Applying install effects
    Applying = 2,

    /// Every apply succeeded (terminal state)
    Committed = 3,

    /// Reverting the components that applied successfully
    RollingBack = 4,

    /// Rollback pass finished (terminal state)
    RolledBack = 5,

    /// Stopped on request before the apply phase (terminal state)
    Canceled = 6,
}

impl TransactionStage {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Canceled)
    }

    /// Returns true if `target` is a legal next stage
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::NotStarted, Self::CapturingState)
                | (Self::CapturingState, Self::Applying)
                | (Self::Applying, Self::Committed)
                | (Self::Applying, Self::RollingBack)
                | (Self::RollingBack, Self::RolledBack)
                | (Self::NotStarted, Self::Canceled)
                | (Self::CapturingState, Self::Canceled)
        )
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::CapturingState => "Capturing state",
            Self::Applying => "Applying",
            Self::Committed => "Committed",
            Self::RollingBack => "Rolling back",
            Self::RolledBack => "Rolled back",
            Self::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot transition from terminal stage {from}")]
    FromTerminalState { from: TransactionStage },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStage,
        to: TransactionStage,
    },
}

/// Owns the current stage of one transaction.
///
/// ```
/// use installkit::transaction_state::{TransactionContext, TransactionStage};
///
/// let mut ctx = TransactionContext::new();
/// ctx.transition_to(TransactionStage::CapturingState).unwrap();
///
/// // Cannot skip straight to commit
/// assert!(ctx.transition_to(TransactionStage::Committed).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct TransactionContext {
    current: TransactionStage,
    history: Vec<TransactionStage>,
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            current: TransactionStage::NotStarted,
            history: vec![TransactionStage::NotStarted],
        }
    }

    #[inline]
    pub fn current_stage(&self) -> TransactionStage {
        self.current
    }

    /// Every stage visited, in order, starting with `NotStarted`
    pub fn history(&self) -> &[TransactionStage] {
        &self.history
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Move to `target`.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if already committed, rolled back or canceled
    /// - `InvalidTransition` for any edge not in the stage flow
    pub fn transition_to(
        &mut self,
        target: TransactionStage,
    ) -> Result<TransactionStage, TransitionError> {
        if self.current.is_terminal() {
            return Err(TransitionError::FromTerminalState { from: self.current });
        }

        if !self.current.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: self.current,
                to: target,
            });
        }

        tracing::debug!("Transaction stage: {} -> {}", self.current, target);
        self.current = target;
        self.history.push(target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_path() {
        let mut ctx = TransactionContext::new();
        ctx.transition_to(TransactionStage::CapturingState).unwrap();
        ctx.transition_to(TransactionStage::Applying).unwrap();
        ctx.transition_to(TransactionStage::Committed).unwrap();

        assert!(ctx.is_terminal());
        assert_eq!(
            ctx.history(),
            [
                TransactionStage::NotStarted,
                TransactionStage::CapturingState,
                TransactionStage::Applying,
                TransactionStage::Committed
            ]
        );
    }

    #[test]
    fn test_rollback_path() {
        let mut ctx = TransactionContext::new();
        ctx.transition_to(TransactionStage::CapturingState).unwrap();
        ctx.transition_to(TransactionStage::Applying).unwrap();
        ctx.transition_to(TransactionStage::RollingBack).unwrap();
        ctx.transition_to(TransactionStage::RolledBack).unwrap();
        assert_eq!(ctx.current_stage(), TransactionStage::RolledBack);
    }

    #[test]
    fn test_cannot_skip_capture() {
        let mut ctx = TransactionContext::new();
        let err = ctx.transition_to(TransactionStage::Applying).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: TransactionStage::NotStarted,
                to: TransactionStage::Applying
            }
        );
    }

    #[test]
    fn test_terminal_is_final() {
        let mut ctx = TransactionContext::new();
        ctx.transition_to(TransactionStage::CapturingState).unwrap();
        ctx.transition_to(TransactionStage::Applying).unwrap();
        ctx.transition_to(TransactionStage::Committed).unwrap();

        let err = ctx.transition_to(TransactionStage::RollingBack).unwrap_err();
        assert!(matches!(err, TransitionError::FromTerminalState { .. }));
    }

    #[test]
    fn test_rollback_only_from_applying() {
        assert!(!TransactionStage::CapturingState.can_transition_to(TransactionStage::RollingBack));
        assert!(TransactionStage::Applying.can_transition_to(TransactionStage::RollingBack));
        assert_eq!(TransactionStage::RollingBack.to_string(), "Rolling back");
    }

    #[test]
    fn test_cancel_only_before_apply() {
        assert!(TransactionStage::NotStarted.can_transition_to(TransactionStage::Canceled));
        assert!(TransactionStage::CapturingState.can_transition_to(TransactionStage::Canceled));
        assert!(!TransactionStage::Applying.can_transition_to(TransactionStage::Canceled));
        assert!(!TransactionStage::RollingBack.can_transition_to(TransactionStage::Canceled));

        let mut ctx = TransactionContext::new();
        ctx.transition_to(TransactionStage::CapturingState).unwrap();
        ctx.transition_to(TransactionStage::Canceled).unwrap();
        assert!(ctx.is_terminal());
        let err = ctx.transition_to(TransactionStage::Applying).unwrap_err();
        assert_eq!(
            err,
            TransitionError::FromTerminalState {
                from: TransactionStage::Canceled
            }
        );
    }
}
