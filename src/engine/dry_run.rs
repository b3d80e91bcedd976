//! Logging-only actions for simulated transactions.
//!
//! Nothing touches the target system: every phase logs what it would do.
//! Components listed in `fail_apply` report an apply failure so the rollback
//! path can be exercised end to end.

use crate::engine::coordinator::ActionListBuilder;
use crate::engine::operation::{Action, ActionError, Operation};
use crate::types::Phase;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

struct DryRunAction {
    component: String,
    fail_apply: bool,
}

impl Action for DryRunAction {
    fn capture_state(&self) -> Result<(), ActionError> {
        info!("[DRY RUN] Would record state of {}", self.component);
        Ok(())
    }

    fn apply(&self) -> Result<(), ActionError> {
        if self.fail_apply {
            return Err(ActionError::failed(format!(
                "simulated failure installing {}",
                self.component
            )));
        }
        info!("[DRY RUN] Would install {}", self.component);
        Ok(())
    }

    fn revert(&self) -> Result<(), ActionError> {
        info!("[DRY RUN] Would uninstall {}", self.component);
        Ok(())
    }
}

/// Builds one logging action per component and phase.
#[derive(Debug, Clone, Default)]
pub struct DryRunBuilder {
    fail_apply: BTreeSet<String>,
}

impl DryRunBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the apply of `component` fail
    pub fn fail_apply(mut self, component: impl Into<String>) -> Self {
        self.fail_apply.insert(component.into());
        self
    }
}

impl ActionListBuilder for DryRunBuilder {
    fn build(&self, component: &str, phase: Phase) -> Vec<Operation> {
        let action = DryRunAction {
            component: component.to_string(),
            fail_apply: self.fail_apply.contains(component),
        };
        vec![Operation::new(component, phase, Arc::new(action))]
    }
}
