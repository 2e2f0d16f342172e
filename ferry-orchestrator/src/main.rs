use anyhow::{Context, Result};
use ferry_runner::{Environment, ReleaseConfig};
use ferry_runner::podman::Podman;
use ferry_runner::repository::HttpClusterApi;
use ferry_runner::service::{ReleaseRequest, ReleaseRunner};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod repository;
pub mod service;

use config::Config;
use service::checkout::{GitCheckout, NoCheckout, SourceCheckout, is_git_work_tree};
use service::run_service::RunService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ferry Orchestrator...");

    let config = Config::from_env()?;
    config.validate().context("Invalid orchestrator configuration")?;

    let release = ReleaseConfig::load(&config.config_path)
        .with_context(|| format!("Failed to load {}", config.config_path.display()))?;
    let env = Environment::from_env().context("Invalid environment")?;
    let target = release.deployment_target(env.cluster_url.as_deref())?;

    let podman = Arc::new(Podman::new(&config.podman));
    podman.check_available().await?;
    let cluster = Arc::new(HttpClusterApi::connect(
        &target.cluster_url,
        env.cluster_token.as_deref(),
    )?);
    let runner = ReleaseRunner::from_config(&release, podman.clone(), podman, cluster)
        .context("Failed to set up release pipeline")?;

    let checkout: Arc<dyn SourceCheckout> = if config.git_checkout {
        if !is_git_work_tree(&release.build.context) {
            anyhow::bail!(
                "FERRY_GIT_CHECKOUT is set but {} is not a git working tree",
                release.build.context.display()
            );
        }
        Arc::new(GitCheckout::new(&release.build.context))
    } else {
        Arc::new(NoCheckout)
    };

    let template = ReleaseRequest {
        build: release.build_spec(),
        commit: None,
        latest: release.image.latest,
        target,
        credentials: env.registry_credentials,
    };

    let service = RunService::new(
        Arc::new(runner),
        template,
        checkout,
        &config.branch,
        config.max_concurrent_runs,
    )
    .with_retention(config.retained_runs);

    tracing::info!(
        "Releasing {} on pushes to {} (up to {} concurrent run(s))",
        release.app.name,
        config.branch,
        config.max_concurrent_runs
    );

    // Build router with all API endpoints
    let app = api::create_router(Arc::new(service));

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
