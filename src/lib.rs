//! installkit library
//!
//! Resolves which installable components an install request requires and
//! executes their actions as an all-or-nothing transaction with concurrent
//! execution and best-effort rollback.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod logic;
pub mod transaction_state;
pub mod types;

// Re-export main types for convenience
pub use catalog::{AutoDependencyRule, Catalog, CatalogError, Component, ComponentCatalog};
pub use config::InstallerConfig;
pub use diagnostics::{DiagnosticsSink, FailureRecord, MemorySink, TracingSink};
pub use engine::coordinator::{
    ActionListBuilder, TransactionCoordinator, TransactionReport, TransactionStatus,
};
pub use engine::dry_run::DryRunBuilder;
pub use engine::operation::{Action, ActionError, Operation, OperationOutcome};
pub use engine::runner::{OperationId, OperationRunner, OutcomeMap, OutcomeRecord};
pub use error::InstallKitError;
pub use logic::resolver::{
    Resolver, ResolverOptions, SelectionError, SelectionRequest, SelectionResult,
};
pub use transaction_state::{TransactionContext, TransactionStage, TransitionError};
pub use types::{ComponentFlags, Phase};
