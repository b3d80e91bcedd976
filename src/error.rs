//! Error handling module for installkit
//!
//! Provides the crate-level error type. Domain errors (selection, catalog,
//! stage transitions) keep their own enums and convert into this one.

use crate::catalog::CatalogError;
use crate::logic::resolver::SelectionError;
use crate::transaction_state::TransitionError;
use thiserror::Error;

/// Main error type for installkit
#[derive(Error, Debug)]
pub enum InstallKitError {
    /// Request rejected before any operation was built
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Inconsistent catalog description
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Transaction stage machine misuse
    #[error("Transaction error: {0}")]
    Transition(#[from] TransitionError),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker pool could not be created
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Malformed catalog description
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for installkit operations
pub type Result<T> = std::result::Result<T, InstallKitError>;

impl InstallKitError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a worker pool error
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }
}
