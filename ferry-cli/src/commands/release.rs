//! Release command handler
//!
//! Runs the full pipeline: build, tag, publish, render and watch.

use anyhow::{Context, Result};
use colored::*;
use ferry_runner::podman::Podman;
use ferry_runner::repository::HttpClusterApi;
use ferry_runner::service::{ReleaseRequest, ReleaseRunner};
use std::sync::Arc;
use uuid::Uuid;

use crate::commands::cancel_on_interrupt;
use crate::commit::resolve_commit;
use crate::config::Config;
use crate::output::{ConsoleObserver, print_rollout, print_run_error};

pub async fn handle_release(
    config: &Config,
    commit: Option<String>,
    latest: bool,
    json: bool,
) -> Result<()> {
    let release = config.release()?;
    let env = config.environment()?;
    let target = release.deployment_target(env.cluster_url.as_deref())?;

    let podman = Arc::new(Podman::new(&config.podman));
    podman.check_available().await?;
    let cluster = Arc::new(HttpClusterApi::connect(
        &target.cluster_url,
        env.cluster_token.as_deref(),
    )?);
    let runner = ReleaseRunner::from_config(&release, podman.clone(), podman, cluster)
        .context("Failed to set up release pipeline")?;

    let request = ReleaseRequest {
        build: release.build_spec(),
        commit: resolve_commit(commit, &release.build.context).await,
        latest: latest && release.image.latest,
        target,
        credentials: env.registry_credentials,
    };

    let run_id = Uuid::new_v4();
    println!(
        "{} {} {}",
        "Releasing".bold(),
        release.app.name.cyan(),
        format!("(run {})", run_id).dimmed()
    );

    let cancel = cancel_on_interrupt();
    match runner.run(run_id, &request, &cancel, &ConsoleObserver).await {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            print_rollout(&report.rollout);
            println!();
            println!(
                "{}",
                format!(
                    "✓ {} released as {} successfully!",
                    release.app.name,
                    runner.publisher().reference(&report.tags, report.tags.primary())
                )
                .green()
                .bold()
            );
            Ok(())
        }
        Err(e) => {
            print_run_error(&e);
            Err(e.into())
        }
    }
}
