//! Release runs
//!
//! Drives one release through Build -> Tag -> Publish -> Render -> Watch,
//! strictly in order. The first failing stage halts the run and is reported
//! together with its cause.

use ferry_core::domain::build::{BuildSpec, ImageArtifact};
use ferry_core::domain::deploy::DeploymentTarget;
use ferry_core::domain::rollout::RolloutStatus;
use ferry_core::domain::run::Stage;
use ferry_core::domain::tag::TagSet;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::cache::BuildCache;
use crate::config::ReleaseConfig;
use crate::error::{ConfigError, RunError, StageError};
use crate::service::builder::{BuildBackend, ImageBuilder};
use crate::service::publisher::{PublishReport, Publisher, Registry, RegistryCredentials};
use crate::service::render::ManifestRenderer;
use crate::service::tags::TagPlanner;
use crate::service::watcher::{CancelToken, ClusterApi, RolloutWatcher};

/// Receives progress notifications during a run
///
/// Every method defaults to doing nothing.
pub trait RunObserver: Send + Sync {
    fn stage_started(&self, _run_id: Uuid, _stage: Stage) {}

    fn artifact_built(&self, _run_id: Uuid, _artifact: &ImageArtifact) {}

    fn tags_planned(&self, _run_id: Uuid, _tags: &TagSet) {}

    fn tags_published(&self, _run_id: Uuid, _report: &PublishReport) {}
}

/// Observer that ignores every notification
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Everything a single run needs
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub build: BuildSpec,
    /// Commit the source tree was checked out at
    pub commit: Option<String>,
    /// Whether to also publish the `latest` tag
    pub latest: bool,
    pub target: DeploymentTarget,
    /// Registry credentials; `None` for anonymous registries
    pub credentials: Option<RegistryCredentials>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub artifact: ImageArtifact,
    pub tags: TagSet,
    pub publish: PublishReport,
    /// `Kind/name` of every applied manifest
    pub manifests: Vec<String>,
    pub rollout: RolloutStatus,
}

/// Runs releases through the five pipeline stages
pub struct ReleaseRunner {
    builder: ImageBuilder,
    planner: TagPlanner,
    publisher: Publisher,
    renderer: ManifestRenderer,
    watcher: RolloutWatcher,
}

impl ReleaseRunner {
    pub fn new(
        builder: ImageBuilder,
        planner: TagPlanner,
        publisher: Publisher,
        renderer: ManifestRenderer,
        watcher: RolloutWatcher,
    ) -> Self {
        Self {
            builder,
            planner,
            publisher,
            renderer,
            watcher,
        }
    }

    /// Wires the pipeline described by `config` to the given collaborators
    pub fn from_config(
        config: &ReleaseConfig,
        backend: Arc<dyn BuildBackend>,
        registry: Arc<dyn Registry>,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, ConfigError> {
        let templates = config
            .template_set()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self::new(
            ImageBuilder::new(backend, BuildCache::new(&config.build.cache_dir)),
            config.tag_planner(),
            Publisher::new(registry, config.publish_settings()),
            ManifestRenderer::new(templates),
            RolloutWatcher::new(cluster, config.watch_settings()),
        ))
    }

    pub fn builder(&self) -> &ImageBuilder {
        &self.builder
    }

    pub fn planner(&self) -> &TagPlanner {
        &self.planner
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn renderer(&self) -> &ManifestRenderer {
        &self.renderer
    }

    pub fn watcher(&self) -> &RolloutWatcher {
        &self.watcher
    }

    /// Executes a full release
    ///
    /// Cancellation is honoured between stages and during the watch; an
    /// interrupted run leaves registry and cluster state as they are.
    pub async fn run(
        &self,
        run_id: Uuid,
        request: &ReleaseRequest,
        cancel: &CancelToken,
        observer: &dyn RunObserver,
    ) -> Result<RunReport, RunError> {
        let span = info_span!("run", %run_id, repository = %request.build.repository);

        async {
            info!("Starting release run {}", run_id);
            let result = self.run_stages(run_id, request, cancel, observer).await;

            match &result {
                Ok(report) => info!(
                    "Release run {} succeeded: {} rolled out",
                    run_id,
                    report.tags.primary()
                ),
                Err(e) if e.is_cancelled() => info!("Release run {} cancelled", run_id),
                Err(e) => error!("Release run {} failed: {}", run_id, e),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        request: &ReleaseRequest,
        cancel: &CancelToken,
        observer: &dyn RunObserver,
    ) -> Result<RunReport, RunError> {
        let artifact = stage(run_id, Stage::Build, cancel, observer, async {
            self.builder.build(&request.build).await
        })
        .await?;
        observer.artifact_built(run_id, &artifact);

        let tags = stage(run_id, Stage::Tag, cancel, observer, async {
            Ok(self.planner.plan(
                &request.build.repository,
                request.commit.as_deref(),
                request.latest,
            )?)
        })
        .await?;
        info!("Planned tags: {}", tags.tags().join(", "));
        observer.tags_planned(run_id, &tags);

        let publish = stage(run_id, Stage::Publish, cancel, observer, async {
            self.publisher
                .publish(&artifact, &tags, request.credentials.as_ref())
                .await
        })
        .await?;
        observer.tags_published(run_id, &publish);

        let image = self.publisher.reference(&tags, tags.primary());
        let manifests = stage(run_id, Stage::Render, cancel, observer, async {
            Ok(self.renderer.render(&request.target, &image)?)
        })
        .await?;

        let rollout = stage(run_id, Stage::Watch, cancel, observer, async {
            self.watcher
                .roll_out(&manifests, &request.target, cancel)
                .await
        })
        .await?;

        Ok(RunReport {
            run_id,
            artifact,
            tags,
            publish,
            manifests: manifests
                .iter()
                .map(|m| format!("{}/{}", m.kind, m.name))
                .collect(),
            rollout,
        })
    }
}

/// Runs one stage inside its span, checking for cancellation first
async fn stage<T, F>(
    run_id: Uuid,
    stage: Stage,
    cancel: &CancelToken,
    observer: &dyn RunObserver,
    work: F,
) -> Result<T, RunError>
where
    F: Future<Output = Result<T, StageError>>,
{
    if cancel.is_cancelled() {
        return Err(RunError::new(stage, StageError::Cancelled));
    }

    observer.stage_started(run_id, stage);
    async {
        info!("Stage {} started", stage);
        let result = work.await.map_err(|e| RunError::new(stage, e));
        if result.is_ok() {
            info!("Stage {} completed", stage);
        }
        result
    }
    .instrument(info_span!("stage", %stage))
    .await
}
