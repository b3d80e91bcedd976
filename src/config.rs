//! Installer configuration file handling.
//!
//! A small JSON document that tunes the runner and the resolver. Every field
//! has a default, so an empty object is a valid configuration.

use crate::error::InstallKitError;
use crate::logic::resolver::ResolverOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Installer configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Worker pool size; `None` uses one worker per logical core
    pub workers: Option<usize>,

    /// Seed explicit requests with default components too
    pub include_defaults_with_explicit: bool,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            include_defaults_with_explicit: true,
        }
    }
}

impl InstallerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(InstallKitError::config("worker count must be at least 1").into());
        }
        Ok(())
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            include_defaults_with_explicit: self.include_defaults_with_explicit,
        }
    }
}
