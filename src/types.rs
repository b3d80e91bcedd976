//! Shared value types for selection and execution.
//!
//! Phases use strum enums the same way configuration values do elsewhere:
//! `Display`/`EnumString` give a stable lowercase name for logs and the CLI.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// The three modes an operation can run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Record pre-change state so a later revert can restore it
    CaptureState,
    /// Perform the actual install effect
    Apply,
    /// Undo a previous successful apply
    Revert,
}

impl Phase {
    /// Returns true if this phase changes the target system
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Apply | Self::Revert)
    }
}

/// Per-component flags read from the catalog.
///
/// All flags default to `false`, so a catalog entry only lists what it sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentFlags {
    /// Cannot be requested directly
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Groups children; a concrete child must be requested instead
    pub checkable_leaf_only: bool,
    /// Always part of the selection
    pub forced: bool,
    /// Seeds the default set
    pub default_selected: bool,
    /// Only reachable through dependencies or autodependencies
    pub install_only_as_dependency: bool,
}
