//! Transaction Coordinator
//!
//! Sequences the phases of one install transaction over a resolved
//! selection:
//!
//! 1. `CaptureState` for every selected component (best effort, never aborts)
//! 2. `Apply` for every selected component
//! 3. All applies succeeded: committed
//! 4. Otherwise `Revert` the components whose apply succeeded, in reverse
//!    apply order, in a single pass without retries
//!
//! A cancel request on the runner is checked before capture and again before
//! apply. Either check stops the transaction as canceled with nothing applied.
//! Once apply has started, cancellation only affects the running batch and the
//! usual rollback follows.
//!
//! Within a phase the runner gives no ordering guarantee; the selection order
//! only decides which components are handed over and in what order the
//! action-list builder sees them.

use crate::catalog::ComponentCatalog;
use crate::diagnostics::FailureRecord;
use crate::engine::operation::Operation;
use crate::engine::runner::{OperationRunner, OutcomeMap};
use crate::error::Result;
use crate::logic::resolver::{Resolver, SelectionRequest, SelectionResult};
use crate::transaction_state::{TransactionContext, TransactionStage};
use crate::types::Phase;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Turns a component into the operations for one phase.
///
/// This is where payload copies, registry edits and scripts live. Every
/// returned operation must be bound to `component` and `phase`.
///
/// `build` is called separately for every phase. A builder whose revert
/// depends on captured state must return the same [`Action`] for a component
/// each time, for example by caching actions per component.
///
/// [`Action`]: crate::engine::operation::Action
pub trait ActionListBuilder {
    fn build(&self, component: &str, phase: Phase) -> Vec<Operation>;
}

impl<F> ActionListBuilder for F
where
    F: Fn(&str, Phase) -> Vec<Operation>,
{
    fn build(&self, component: &str, phase: Phase) -> Vec<Operation> {
        self(component, phase)
    }
}

/// Overall result of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionStatus {
    Committed,
    /// An apply failed and the successfully applied components were reverted
    RolledBack {
        /// First component in apply order whose apply failed
        component: String,
        detail: String,
    },
    /// Canceled before the apply phase; nothing was applied or reverted
    Canceled,
}

/// Transaction status plus the full outcome history of every phase run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReport {
    pub status: TransactionStatus,
    pub stage: TransactionStage,
    /// One outcome map per phase, in the order the phases ran
    pub history: Vec<OutcomeMap>,
    /// Components handed to the revert phase, in the order they were issued
    pub reverted: Vec<String>,
}

impl TransactionReport {
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }

    /// Outcomes of `phase`, if that phase ran
    pub fn outcomes(&self, phase: Phase) -> Option<&OutcomeMap> {
        self.history.iter().find(|map| map.phase() == phase)
    }
}

/// Drives capture, apply and rollback for one selection.
pub struct TransactionCoordinator<'r, B: ActionListBuilder> {
    runner: &'r OperationRunner,
    builder: B,
}

impl<'r, B: ActionListBuilder> TransactionCoordinator<'r, B> {
    pub fn new(runner: &'r OperationRunner, builder: B) -> Self {
        Self { runner, builder }
    }

    /// Resolve `request` and execute the selection.
    ///
    /// # Errors
    ///
    /// A rejected request is returned as `InstallKitError::Selection` and
    /// reported to the runner's diagnostics sink; no operation is built.
    pub fn install<C: ComponentCatalog + ?Sized>(
        &self,
        resolver: &Resolver<'_, C>,
        request: &SelectionRequest,
    ) -> Result<TransactionReport> {
        let selection = resolver.resolve(request).inspect_err(|e| {
            self.runner
                .sink()
                .record(FailureRecord::selection(e.component(), e.to_string()));
        })?;
        self.execute(&selection)
    }

    /// Run the transaction over an already resolved selection.
    pub fn execute(&self, selection: &SelectionResult) -> Result<TransactionReport> {
        let mut ctx = TransactionContext::new();
        let mut history = Vec::with_capacity(3);

        if self.runner.take_cancel_request() {
            return self.canceled(ctx, history);
        }

        ctx.transition_to(TransactionStage::CapturingState)?;
        let capture = self.run_phase(selection.apply_order(), Phase::CaptureState);
        for failure in capture.failures() {
            warn!(
                "State capture failed for {}, continuing: {}",
                failure.component,
                failure.outcome.reason().unwrap_or_default()
            );
        }
        history.push(capture);

        if self.runner.take_cancel_request() {
            return self.canceled(ctx, history);
        }

        ctx.transition_to(TransactionStage::Applying)?;
        let apply = self.run_phase(selection.apply_order(), Phase::Apply);

        let origin = selection
            .apply_order()
            .find(|c| apply.component_succeeded(c) == Some(false));

        let Some(origin) = origin else {
            history.push(apply);
            self.discard_late_cancel();
            ctx.transition_to(TransactionStage::Committed)?;
            info!("Transaction committed ({} component(s))", selection.len());
            return Ok(TransactionReport {
                status: TransactionStatus::Committed,
                stage: ctx.current_stage(),
                history,
                reverted: Vec::new(),
            });
        };

        let detail = apply
            .first_failure(origin)
            .and_then(|r| r.outcome.reason())
            .unwrap_or("apply failed")
            .to_string();
        warn!("Apply failed for {}: {}; rolling back", origin, detail);

        let reverted: Vec<String> = selection
            .rollback_order()
            .filter(|c| apply.component_succeeded(c) == Some(true))
            .map(str::to_string)
            .collect();
        history.push(apply);

        ctx.transition_to(TransactionStage::RollingBack)?;
        let revert = self.run_phase(reverted.iter().map(String::as_str), Phase::Revert);
        for failure in revert.failures() {
            warn!(
                "Revert failed for {}, not retrying: {}",
                failure.component,
                failure.outcome.reason().unwrap_or_default()
            );
        }
        history.push(revert);
        self.discard_late_cancel();
        ctx.transition_to(TransactionStage::RolledBack)?;

        info!("Transaction rolled back ({} component(s) reverted)", reverted.len());
        Ok(TransactionReport {
            status: TransactionStatus::RolledBack {
                component: origin.to_string(),
                detail,
            },
            stage: ctx.current_stage(),
            history,
            reverted,
        })
    }

    fn canceled(
        &self,
        mut ctx: TransactionContext,
        history: Vec<OutcomeMap>,
    ) -> Result<TransactionReport> {
        ctx.transition_to(TransactionStage::Canceled)?;
        info!("Transaction canceled before apply");
        Ok(TransactionReport {
            status: TransactionStatus::Canceled,
            stage: ctx.current_stage(),
            history,
            reverted: Vec::new(),
        })
    }

    /// A request that arrived after apply started was served by the batches
    /// it canceled and must not stop the next transaction.
    fn discard_late_cancel(&self) {
        if self.runner.take_cancel_request() {
            debug!("Dropping cancel request received after apply started");
        }
    }

    fn run_phase<'s>(&self, components: impl Iterator<Item = &'s str>, phase: Phase) -> OutcomeMap {
        let mut operations = Vec::new();
        for component in components {
            let built = self.builder.build(component, phase);
            if let Some(stray) = built.iter().find(|op| op.component() != component) {
                warn!(
                    "Builder returned an operation for {} while building {}",
                    stray.component(),
                    component
                );
            }
            operations.extend(built);
        }
        self.runner.run(operations, phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::operation::{Action, ActionError};
    use std::sync::{Arc, Mutex};

    struct Scripted {
        fail_apply: bool,
    }

    impl Action for Scripted {
        fn apply(&self) -> std::result::Result<(), ActionError> {
            if self.fail_apply {
                Err(ActionError::failed("checksum mismatch"))
            } else {
                Ok(())
            }
        }

        fn revert(&self) -> std::result::Result<(), ActionError> {
            Ok(())
        }
    }

    fn selection(ids: &[&str]) -> SelectionResult {
        serde_json::from_value(serde_json::json!({ "components": ids })).unwrap()
    }

    #[test]
    fn test_commit_when_all_apply() {
        let runner = OperationRunner::new(Some(2)).unwrap();
        let builder = |component: &str, phase: Phase| {
            vec![Operation::new(component, phase, Arc::new(Scripted { fail_apply: false }))]
        };
        let report = TransactionCoordinator::new(&runner, builder)
            .execute(&selection(&["A", "B"]))
            .unwrap();

        assert!(report.is_committed());
        assert_eq!(report.stage, TransactionStage::Committed);
        assert_eq!(report.history.len(), 2);
        assert!(report.outcomes(Phase::Revert).is_none());
    }

    #[test]
    fn test_rollback_reverts_applied_in_reverse() {
        let runner = OperationRunner::new(Some(1)).unwrap();
        let issued = Mutex::new(Vec::new());
        let builder = |component: &str, phase: Phase| {
            if phase == Phase::Revert {
                issued.lock().unwrap().push(component.to_string());
            }
            let fail_apply = component == "C";
            vec![Operation::new(component, phase, Arc::new(Scripted { fail_apply }))]
        };
        let report = TransactionCoordinator::new(&runner, &builder)
            .execute(&selection(&["A", "B", "C", "D"]))
            .unwrap();

        assert_eq!(
            report.status,
            TransactionStatus::RolledBack {
                component: "C".into(),
                detail: "checksum mismatch".into()
            }
        );
        assert_eq!(report.reverted, vec!["D", "B", "A"]);
        assert_eq!(*issued.lock().unwrap(), vec!["D", "B", "A"]);
        assert_eq!(report.stage, TransactionStage::RolledBack);
        assert_eq!(report.history.len(), 3);
    }

    #[test]
    fn test_cancel_before_execute_applies_nothing() {
        let runner = OperationRunner::new(Some(1)).unwrap();
        let built = Mutex::new(Vec::new());
        let builder = |component: &str, phase: Phase| {
            built.lock().unwrap().push(phase);
            vec![Operation::new(component, phase, Arc::new(Scripted { fail_apply: false }))]
        };
        runner.cancel();

        let coordinator = TransactionCoordinator::new(&runner, &builder);
        let report = coordinator.execute(&selection(&["A", "B"])).unwrap();

        assert_eq!(report.status, TransactionStatus::Canceled);
        assert_eq!(report.stage, TransactionStage::Canceled);
        assert!(report.history.is_empty());
        assert!(built.lock().unwrap().is_empty());

        // The request was consumed
        let report = coordinator.execute(&selection(&["A", "B"])).unwrap();
        assert!(report.is_committed());
    }
}
