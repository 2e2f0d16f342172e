//! Init command handler
//!
//! Writes a sample `ferry.yaml` to get a project started.

use anyhow::{Context, Result};
use colored::*;
use ferry_runner::ReleaseConfig;
use std::fs;
use std::path::Path;

use crate::config::Config;

pub async fn handle_init(config: &Config, name: Option<String>, force: bool) -> Result<()> {
    let path = &config.config_path;

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let name = match name {
        Some(name) => name,
        None => default_name(path)?,
    };

    let sample = ReleaseConfig::sample(&name);
    ReleaseConfig::parse(&sample)
        .with_context(|| format!("'{}' is not a usable application name", name))?;

    fs::write(path, sample).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{}", format!("✓ Created {}", path.display()).green().bold());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Set image.registry and image.repository");
    println!("  2. Export FERRY_CLUSTER_URL and FERRY_CLUSTER_TOKEN");
    println!("  3. Run {} to ship it", "ferry release".cyan());

    Ok(())
}

/// Lowercased name of the directory that will hold the config
fn default_name(config_path: &Path) -> Result<String> {
    let dir = match config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.canonicalize(),
        None => std::env::current_dir(),
    }
    .context("Failed to resolve project directory")?;

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase().replace(['_', ' ', '.'], "-"))
        .unwrap_or_else(|| "app".to_string());

    Ok(name)
}
