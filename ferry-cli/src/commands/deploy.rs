//! Render and watch command handlers
//!
//! Renders manifests without applying them, and re-watches a rollout that
//! was already applied (e.g., after a timeout).

use anyhow::{Context, Result};
use colored::*;
use ferry_core::domain::run::Stage;
use ferry_core::domain::tag::ImageReference;
use ferry_runner::RunError;
use ferry_runner::repository::HttpClusterApi;
use ferry_runner::service::{ManifestRenderer, RolloutWatcher};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::commands::cancel_on_interrupt;
use crate::commit::resolve_commit;
use crate::config::Config;
use crate::output::{print_rollout, print_run_error};

/// Render manifests for a tag
pub async fn handle_render(
    config: &Config,
    tag: Option<String>,
    commit: Option<String>,
    output: Option<String>,
) -> Result<()> {
    let release = config.release()?;

    let tag = match tag {
        Some(tag) => tag,
        None => {
            let commit = resolve_commit(commit, &release.build.context).await;
            release
                .tag_planner()
                .plan(&release.image.repository, commit.as_deref(), false)?
                .primary()
                .to_string()
        }
    };

    let image = ImageReference::new(&release.image.registry, &release.image.repository, &tag);
    let renderer = ManifestRenderer::new(release.template_set()?);
    let manifests = renderer.render(&release.render_target(), &image)?;

    match output {
        Some(dir) => {
            let dir = Path::new(&dir);
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            for manifest in &manifests {
                let path = dir.join(format!(
                    "{}-{}.yaml",
                    manifest.kind.to_lowercase(),
                    manifest.name
                ));
                fs::write(&path, &manifest.text)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("  {} {}", "Created".green(), path.display());
            }

            println!(
                "{}",
                format!("✓ Rendered {} manifest(s) for {}", manifests.len(), image)
                    .green()
                    .bold()
            );
        }
        None => {
            for (i, manifest) in manifests.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                print!("{}", manifest.text);
            }
        }
    }

    Ok(())
}

/// Watch the configured deployment until it settles
pub async fn handle_watch(config: &Config) -> Result<()> {
    let release = config.release()?;
    let env = config.environment()?;
    let target = release.deployment_target(env.cluster_url.as_deref())?;

    let cluster = HttpClusterApi::connect(&target.cluster_url, env.cluster_token.as_deref())?;
    let watcher = RolloutWatcher::new(Arc::new(cluster), release.watch_settings());

    println!(
        "{} {}/{}",
        "Watching".bold(),
        target.namespace,
        target.name.cyan()
    );

    let cancel = cancel_on_interrupt();
    match watcher.watch(&target, &cancel).await {
        Ok(status) => {
            print_rollout(&status);
            println!("{}", "✓ Rollout healthy!".green().bold());
            Ok(())
        }
        Err(e) => {
            let error = RunError::new(Stage::Watch, e);
            print_run_error(&error);
            Err(error.into())
        }
    }
}
