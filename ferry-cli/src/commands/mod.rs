//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod build;
mod deploy;
mod init;
mod release;

use anyhow::Result;
use clap::Subcommand;
use ferry_runner::service::CancelToken;
use tracing::warn;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build, publish and roll out the current source tree
    Release {
        /// Commit identifier (defaults to FERRY_COMMIT, GITHUB_SHA or git HEAD)
        #[arg(long)]
        commit: Option<String>,

        /// Do not publish the `latest` tag
        #[arg(long)]
        no_latest: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build the image without publishing it
    Build,
    /// Show the tags a release would publish
    Tags {
        #[arg(long)]
        commit: Option<String>,

        #[arg(long)]
        no_latest: bool,
    },
    /// Render manifests for a tag
    Render {
        /// Tag to render (defaults to the commit tag)
        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        commit: Option<String>,

        /// Write one file per manifest into this directory instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Watch the current rollout until it settles
    Watch,
    /// Write a sample ferry.yaml
    Init {
        /// Application name (defaults to the current directory name)
        #[arg(long)]
        name: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Release {
            commit,
            no_latest,
            json,
        } => release::handle_release(config, commit, !no_latest, json).await,
        Commands::Build => build::handle_build(config).await,
        Commands::Tags { commit, no_latest } => {
            build::handle_tags(config, commit, !no_latest).await
        }
        Commands::Render {
            tag,
            commit,
            output,
        } => deploy::handle_render(config, tag, commit, output).await,
        Commands::Watch => deploy::handle_watch(config).await,
        Commands::Init { name, force } => init::handle_init(config, name, force).await,
    }
}

/// Cancel token tripped by Ctrl-C
fn cancel_on_interrupt() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            token.cancel();
        }
    });
    cancel
}
