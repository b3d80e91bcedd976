//! Engine modules: execution of resolved selections.
//!
//! The engine takes the ordered selection produced by the logic layer, asks
//! an action-list builder for per-phase operations, and runs them
//! concurrently with scoped rollback on failure.

pub mod coordinator;
pub mod dry_run;
pub mod operation;
pub mod runner;
