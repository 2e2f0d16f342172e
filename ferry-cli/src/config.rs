//! Configuration module
//!
//! Handles CLI configuration and loading of the release configuration.

use anyhow::{Context, Result};
use ferry_runner::{Environment, ReleaseConfig};
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to `ferry.yaml`
    pub config_path: PathBuf,
    /// Podman executable
    pub podman: String,
}

impl Config {
    /// Loads and validates the release configuration
    pub fn release(&self) -> Result<ReleaseConfig> {
        ReleaseConfig::load(&self.config_path)
            .with_context(|| format!("Failed to load {}", self.config_path.display()))
    }

    /// Reads secrets and endpoints from the environment
    pub fn environment(&self) -> Result<Environment> {
        Environment::from_env().context("Invalid environment")
    }
}
