//! Diagnostics sink for selection errors and operation faults.
//!
//! Every failure the core observes is turned into a [`FailureRecord`] and
//! handed to a [`DiagnosticsSink`]. The default [`TracingSink`] forwards to
//! `tracing`; [`MemorySink`] keeps records around for front-ends and tests.

use crate::types::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A structured failure: which component, in which phase, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub component: String,
    /// `None` for selection errors, which happen before any phase runs
    pub phase: Option<Phase>,
    pub message: String,
}

impl FailureRecord {
    pub fn selection(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            phase: None,
            message: message.into(),
        }
    }

    pub fn operation(component: impl Into<String>, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            phase: Some(phase),
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Some(phase) => write!(f, "[{}] {}: {}", phase, self.component, self.message),
            None => write!(f, "[selection] {}: {}", self.component, self.message),
        }
    }
}

/// Receives failure records. Called from worker threads.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, record: FailureRecord);
}

/// Forwards records to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, record: FailureRecord) {
        match record.phase {
            Some(phase) => tracing::error!(
                component = %record.component,
                %phase,
                "{}",
                record.message
            ),
            None => tracing::error!(component = %record.component, "{}", record.message),
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<FailureRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, record: FailureRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_display() {
        let record = FailureRecord::operation("A", Phase::Apply, "disk full");
        assert_eq!(record.to_string(), "[apply] A: disk full");

        let record = FailureRecord::selection("B", "Cannot install B. Component is virtual.");
        assert_eq!(
            record.to_string(),
            "[selection] B: Cannot install B. Component is virtual."
        );
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.record(FailureRecord::operation("A", Phase::Revert, "boom"));
        sink.record(FailureRecord::selection("B", "missing"));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records()[0].phase, Some(Phase::Revert));
    }
}
