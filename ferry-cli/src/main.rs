//! Ferry CLI
//!
//! Builds, publishes and rolls out a containerized service from the
//! current source tree, driven by `ferry.yaml`.

mod commands;
mod commit;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Ferry release orchestrator", long_about = None)]
struct Cli {
    /// Path to the release configuration
    #[arg(short, long, env = "FERRY_CONFIG", default_value = "ferry.yaml")]
    config: PathBuf,

    /// Podman executable used for builds and pushes
    #[arg(long, env = "FERRY_PODMAN", default_value = "podman")]
    podman: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_cli=info,ferry_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        config_path: cli.config,
        podman: cli.podman,
    };

    handle_command(cli.command, &config).await
}
