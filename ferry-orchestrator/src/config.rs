//! Orchestrator configuration
//!
//! Server settings read from the environment. The release itself is
//! described by the `ferry.yaml` the settings point at.

use std::path::PathBuf;

use crate::repository::run_repository::DEFAULT_RETAINED_RUNS;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Path to `ferry.yaml`
    pub config_path: PathBuf,

    /// Pushes to this branch start runs
    pub branch: String,

    /// Runs executing at once; later runs wait in `Queued`
    pub max_concurrent_runs: usize,

    /// Finished runs kept in memory
    pub retained_runs: usize,

    /// Podman executable
    pub podman: String,

    /// Check out the pushed commit in the build context before each run
    pub git_checkout: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            config_path: PathBuf::from(ferry_runner::config::DEFAULT_CONFIG_FILE),
            branch: "main".to_string(),
            max_concurrent_runs: 1,
            retained_runs: DEFAULT_RETAINED_RUNS,
            podman: "podman".to_string(),
            git_checkout: false,
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - FERRY_BIND_ADDR (default: 0.0.0.0:8080)
    /// - FERRY_CONFIG (default: ferry.yaml)
    /// - FERRY_BRANCH (default: main)
    /// - FERRY_MAX_CONCURRENT_RUNS (default: 1)
    /// - FERRY_RETAINED_RUNS (default: 100)
    /// - FERRY_PODMAN (default: podman)
    /// - FERRY_GIT_CHECKOUT (default: false)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let max_concurrent_runs = match lookup("FERRY_MAX_CONCURRENT_RUNS") {
            Some(value) => value.trim().parse::<usize>().map_err(|_| {
                anyhow::anyhow!("FERRY_MAX_CONCURRENT_RUNS must be a number, got '{}'", value)
            })?,
            None => defaults.max_concurrent_runs,
        };

        let retained_runs = match lookup("FERRY_RETAINED_RUNS") {
            Some(value) => value.trim().parse::<usize>().map_err(|_| {
                anyhow::anyhow!("FERRY_RETAINED_RUNS must be a number, got '{}'", value)
            })?,
            None => defaults.retained_runs,
        };

        let git_checkout = match lookup("FERRY_GIT_CHECKOUT") {
            Some(value) => parse_flag(&value).ok_or_else(|| {
                anyhow::anyhow!("FERRY_GIT_CHECKOUT must be true or false, got '{}'", value)
            })?,
            None => defaults.git_checkout,
        };

        Ok(Self {
            bind_addr: lookup("FERRY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            config_path: lookup("FERRY_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            branch: lookup("FERRY_BRANCH").unwrap_or(defaults.branch),
            max_concurrent_runs,
            retained_runs,
            podman: lookup("FERRY_PODMAN").unwrap_or(defaults.podman),
            git_checkout,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.branch.trim().is_empty() {
            anyhow::bail!("branch cannot be empty");
        }

        if self.max_concurrent_runs == 0 {
            anyhow::bail!("max_concurrent_runs must be greater than 0");
        }

        if self.retained_runs == 0 {
            anyhow::bail!("retained_runs must be greater than 0");
        }

        // Runs share one working tree
        if self.git_checkout && self.max_concurrent_runs > 1 {
            anyhow::bail!("git checkout requires max_concurrent_runs = 1");
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
