//! Build and tag command handlers
//!
//! Runs the first pipeline stages on their own: building the image and
//! planning its tags.

use anyhow::Result;
use colored::*;
use ferry_core::domain::tag::ImageReference;
use ferry_runner::cache::BuildCache;
use ferry_runner::podman::Podman;
use ferry_runner::service::ImageBuilder;
use std::sync::Arc;

use crate::commit::resolve_commit;
use crate::config::Config;
use crate::output::print_artifact;

/// Build the image described by the configuration
pub async fn handle_build(config: &Config) -> Result<()> {
    let release = config.release()?;
    let podman = Podman::new(&config.podman);
    podman.check_available().await?;

    let builder = ImageBuilder::new(
        Arc::new(podman),
        BuildCache::new(&release.build.cache_dir),
    );

    let spec = release.build_spec();
    println!(
        "{} {}",
        "Building".bold(),
        spec.context_dir.display().to_string().cyan()
    );

    let artifact = builder.build(&spec).await?;

    print_artifact(&artifact);
    println!("{}", "✓ Image built successfully!".green().bold());

    Ok(())
}

/// Print the tags a release would publish
pub async fn handle_tags(config: &Config, commit: Option<String>, latest: bool) -> Result<()> {
    let release = config.release()?;
    let commit = resolve_commit(commit, &release.build.context).await;

    let tags = release.tag_planner().plan(
        &release.image.repository,
        commit.as_deref(),
        latest && release.image.latest,
    )?;

    for tag in tags.tags() {
        let reference = ImageReference::new(&release.image.registry, tags.repository(), tag);
        if tag == tags.primary() {
            println!("{} {}", reference.to_string().bold(), "(deployed)".dimmed());
        } else {
            println!("{}", reference);
        }
    }

    Ok(())
}
