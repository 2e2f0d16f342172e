//! In-memory collaborators for orchestrator tests

use async_trait::async_trait;
use ferry_client::ClientError;
use ferry_core::domain::build::{BuildSpec, ImageArtifact};
use ferry_core::domain::deploy::DeploymentTarget;
use ferry_core::domain::tag::ImageReference;
use ferry_core::dto::run::PushEvent;
use ferry_runner::cache::BuildCache;
use ferry_runner::service::builder::{BackendError, ImageDetails};
use ferry_runner::service::{
    BuildBackend, ClusterApi, DeploymentHealth, ImageBuilder, ManifestRenderer, PublishSettings,
    Publisher, Registry, RegistryCredentials, ReleaseRequest, ReleaseRunner, RenderedManifest,
    RolloutWatcher, TagPlanner, TemplateSet, WatchSettings,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::service::checkout::NoCheckout;
use crate::service::run_service::RunService;

pub const DIGEST: &str = "sha256:feed";

struct FakeBackend;

#[async_trait]
impl BuildBackend for FakeBackend {
    async fn build(&self, _: &BuildSpec, _: &str, _: &Path) -> Result<(), BackendError> {
        Ok(())
    }

    async fn inspect(&self, _: &str, _: &BuildSpec) -> Result<Option<ImageDetails>, BackendError> {
        Ok(Some(ImageDetails {
            digest: DIGEST.to_string(),
            size_bytes: 1,
            created_at: chrono::Utc::now(),
        }))
    }
}

/// Registry refusing every push of `rejected_tag`
struct FakeRegistry {
    rejected_tag: Option<String>,
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn login(&self, _: &str, _: &RegistryCredentials) -> Result<(), BackendError> {
        Ok(())
    }

    async fn push(&self, _: &ImageArtifact, target: &ImageReference) -> Result<(), BackendError> {
        if self.rejected_tag.as_deref() == Some(target.tag.as_str()) {
            return Err(BackendError::new("denied: requested access to the resource is denied"));
        }
        Ok(())
    }
}

/// Cluster that never becomes ready unless `ready` is set
struct FakeCluster {
    ready: bool,
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn apply(&self, _: &RenderedManifest) -> Result<(), ClientError> {
        Ok(())
    }

    async fn deployment_health(&self, _: &str, _: &str) -> Result<DeploymentHealth, ClientError> {
        Ok(DeploymentHealth {
            desired: 2,
            ready: if self.ready { 2 } else { 0 },
            updated: 2,
            total: 2,
            blocker: None,
        })
    }
}

/// Run service over fakes, watching `main`; owns its temporary directories
pub struct Fixture {
    pub service: RunService,
    _context: tempfile::TempDir,
    _cache: tempfile::TempDir,
}

impl Fixture {
    pub fn new(cluster_ready: bool) -> Self {
        Self::build(cluster_ready, None)
    }

    /// Fixture whose registry refuses pushes of `tag`
    pub fn rejecting_tag(tag: &str) -> Self {
        Self::build(true, Some(tag.to_string()))
    }

    fn build(cluster_ready: bool, rejected_tag: Option<String>) -> Self {
        let context = tempfile::tempdir().unwrap();
        std::fs::write(context.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let cache = tempfile::tempdir().unwrap();

        let runner = ReleaseRunner::new(
            ImageBuilder::new(Arc::new(FakeBackend), BuildCache::new(cache.path())),
            TagPlanner::default(),
            Publisher::new(
                Arc::new(FakeRegistry { rejected_tag }),
                PublishSettings::new("registry"),
            ),
            ManifestRenderer::new(TemplateSet::builtin()),
            RolloutWatcher::new(
                Arc::new(FakeCluster {
                    ready: cluster_ready,
                }),
                WatchSettings {
                    poll_interval: Duration::from_secs(1),
                    deadline: Duration::from_secs(600),
                    stability_window: Duration::from_secs(2),
                },
            ),
        );

        let template = ReleaseRequest {
            build: BuildSpec::new("app", context.path()),
            commit: None,
            latest: true,
            target: DeploymentTarget::new("https://cluster", "default", "app", 8080, 2),
            credentials: None,
        };

        Self {
            service: RunService::new(Arc::new(runner), template, Arc::new(NoCheckout), "main", 1),
            _context: context,
            _cache: cache,
        }
    }
}

pub fn push(git_ref: &str, after: &str) -> PushEvent {
    PushEvent {
        git_ref: git_ref.to_string(),
        after: after.to_string(),
        repository: None,
    }
}
