//! Rollout watcher
//!
//! Applies rendered manifests and drives a `RolloutStatus` through
//! `Pending -> Progressing -> {Succeeded | Failed | TimedOut}` by polling the
//! cluster at a fixed interval. Cancelling a watch leaves cluster state as it
//! is; nothing is rolled back.

use async_trait::async_trait;
use ferry_client::ClientError;
use ferry_core::domain::deploy::DeploymentTarget;
use ferry_core::domain::rollout::RolloutStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::service::render::RenderedManifest;

/// Replica health of a deployment as seen by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentHealth {
    pub desired: u32,
    pub ready: u32,
    /// Replicas running the latest pod template
    pub updated: u32,
    /// All replicas, including those of older revisions
    pub total: u32,
    /// Permanent error preventing progress (image pull, scheduling, ...)
    pub blocker: Option<String>,
}

/// Cluster API used by the watcher
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Applies a manifest with create-or-update semantics
    async fn apply(&self, manifest: &RenderedManifest) -> Result<(), ClientError>;

    /// Reads the current health of a deployment
    async fn deployment_health(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentHealth, ClientError>;
}

/// Polling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    /// Overall time allowed for the rollout, measured from the first poll
    pub deadline: Duration,
    /// How long ready == desired must hold before declaring success
    pub stability_window: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(300),
            stability_window: Duration::from_secs(10),
        }
    }
}

/// Cooperative cancellation shared between a run and its owner
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Applies manifests and waits for the rollout to settle
pub struct RolloutWatcher {
    cluster: Arc<dyn ClusterApi>,
    settings: WatchSettings,
}

impl RolloutWatcher {
    pub fn new(cluster: Arc<dyn ClusterApi>, settings: WatchSettings) -> Self {
        Self { cluster, settings }
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// Applies `manifests` then watches `target` until a terminal phase
    pub async fn roll_out(
        &self,
        manifests: &[RenderedManifest],
        target: &DeploymentTarget,
        cancel: &CancelToken,
    ) -> Result<RolloutStatus, StageError> {
        self.apply_all(manifests, cancel).await?;
        self.watch(target, cancel).await
    }

    /// Applies manifests in order; stops at the first rejection
    pub async fn apply_all(
        &self,
        manifests: &[RenderedManifest],
        cancel: &CancelToken,
    ) -> Result<(), StageError> {
        for manifest in manifests {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }

            info!(
                "Applying {} {}/{}",
                manifest.kind, manifest.namespace, manifest.name
            );
            self.cluster
                .apply(manifest)
                .await
                .map_err(|e| StageError::RolloutFailure {
                    reason: format!(
                        "failed to apply {} {}/{}: {}",
                        manifest.kind, manifest.namespace, manifest.name, e
                    ),
                    status: None,
                })?;
        }
        Ok(())
    }

    /// Polls the deployment until it is healthy, fails, or the deadline passes
    ///
    /// Re-invoking `watch` after a timeout starts a fresh deadline.
    pub async fn watch(
        &self,
        target: &DeploymentTarget,
        cancel: &CancelToken,
    ) -> Result<RolloutStatus, StageError> {
        let mut status = RolloutStatus::pending(target.replicas);
        let deadline = Instant::now() + self.settings.deadline;
        let mut ticker = time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ready_since: Option<Instant> = None;

        info!(
            "Watching deployment {}/{} for {} ready replica(s) (deadline {:?})",
            target.namespace, target.name, target.replicas, self.settings.deadline
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(target)),
                _ = time::sleep_until(deadline) => return Err(timed_out(status, target)),
                _ = ticker.tick() => {}
            }

            let observation = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(target)),
                _ = time::sleep_until(deadline) => return Err(timed_out(status, target)),
                result = self.cluster.deployment_health(&target.namespace, &target.name) => result,
            };

            let health = match observation {
                Ok(health) => health,
                Err(e) if e.is_not_found() => {
                    debug!(
                        "Deployment {}/{} not visible yet",
                        target.namespace, target.name
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Failed to read deployment {}/{}{}: {}",
                        target.namespace,
                        target.name,
                        if e.is_transient() { "" } else { " (not transient)" },
                        e
                    );
                    continue;
                }
            };

            if let Some(reason) = health.blocker {
                warn!(
                    "Rollout of {}/{} blocked: {}",
                    target.namespace, target.name, reason
                );
                // Not terminal yet: only this loop finishes the status
                let _ = status.fail(reason.clone());
                return Err(StageError::RolloutFailure {
                    reason,
                    status: Some(status),
                });
            }

            let _ = status.observe(health.ready);
            debug!(
                "Deployment {}/{}: {}/{} ready, {} updated, {} total",
                target.namespace, target.name, health.ready, target.replicas, health.updated, health.total
            );

            if is_settled(&health, target.replicas) {
                let since = *ready_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.settings.stability_window {
                    let _ = status.succeed();
                    info!(
                        "Rollout of {}/{} succeeded ({}/{} ready)",
                        target.namespace, target.name, health.ready, target.replicas
                    );
                    return Ok(status);
                }
            } else {
                ready_since = None;
            }
        }
    }

    fn cancelled(&self, target: &DeploymentTarget) -> StageError {
        info!(
            "Watch of {}/{} cancelled; cluster state left as is",
            target.namespace, target.name
        );
        StageError::Cancelled
    }
}

/// Every desired replica runs the new template, is ready, and no old replicas remain
fn is_settled(health: &DeploymentHealth, desired: u32) -> bool {
    health.ready == desired && health.updated >= desired && health.total <= health.updated
}

fn timed_out(mut status: RolloutStatus, target: &DeploymentTarget) -> StageError {
    let _ = status.time_out();
    warn!(
        "Rollout of {}/{} timed out with {}/{} ready",
        target.namespace,
        target.name,
        status.ready_replicas(),
        status.desired_replicas()
    );
    StageError::RolloutTimeout { status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::rollout::RolloutPhase;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cluster whose ready count climbs by one replica per poll
    struct SimulatedCluster {
        desired: u32,
        max_ready: u32,
        polls: AtomicUsize,
        blocker_after: Option<usize>,
        applied: Mutex<Vec<String>>,
    }

    impl SimulatedCluster {
        fn new(desired: u32, max_ready: u32) -> Self {
            Self {
                desired,
                max_ready,
                polls: AtomicUsize::new(0),
                blocker_after: None,
                applied: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClusterApi for SimulatedCluster {
        async fn apply(&self, manifest: &RenderedManifest) -> Result<(), ClientError> {
            self.applied.lock().unwrap().push(manifest.kind.clone());
            Ok(())
        }

        async fn deployment_health(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<DeploymentHealth, ClientError> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            if self.blocker_after.is_some_and(|n| poll >= n) {
                return Ok(DeploymentHealth {
                    desired: self.desired,
                    blocker: Some("ImagePullBackOff: manifest unknown".to_string()),
                    ..Default::default()
                });
            }
            let ready = (poll as u32).min(self.max_ready);
            Ok(DeploymentHealth {
                desired: self.desired,
                ready,
                updated: self.desired,
                total: self.desired,
                blocker: None,
            })
        }
    }

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("https://cluster.local", "default", "app", 3000, 3)
    }

    fn settings() -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(60),
            stability_window: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_succeeds_when_replicas_ready() {
        let cluster = Arc::new(SimulatedCluster::new(3, 3));
        let watcher = RolloutWatcher::new(cluster.clone(), settings());

        let status = watcher.watch(&target(), &CancelToken::new()).await.unwrap();

        assert_eq!(status.phase(), RolloutPhase::Succeeded);
        assert_eq!(status.ready_replicas(), 3);
        // Ready at poll 3, stable through two more polls
        assert_eq!(cluster.polls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_times_out_when_replicas_never_ready() {
        let cluster = Arc::new(SimulatedCluster::new(3, 2));
        let watcher = RolloutWatcher::new(cluster, settings());

        let err = watcher
            .watch(&target(), &CancelToken::new())
            .await
            .unwrap_err();

        let StageError::RolloutTimeout { status } = err else {
            panic!("expected timeout, got {err:?}");
        };
        assert_eq!(status.phase(), RolloutPhase::TimedOut);
        assert_eq!(status.ready_replicas(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_fails_on_permanent_error() {
        let mut cluster = SimulatedCluster::new(3, 3);
        cluster.blocker_after = Some(1);
        let watcher = RolloutWatcher::new(Arc::new(cluster), settings());

        let err = watcher
            .watch(&target(), &CancelToken::new())
            .await
            .unwrap_err();

        match err {
            StageError::RolloutFailure { reason, status } => {
                assert!(reason.contains("ImagePullBackOff"));
                assert_eq!(status.unwrap().phase(), RolloutPhase::Failed);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_can_be_cancelled() {
        let cluster = Arc::new(SimulatedCluster::new(3, 0));
        let watcher = RolloutWatcher::new(cluster.clone(), settings());
        let cancel = CancelToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_secs(12)).await;
                cancel.cancel();
            })
        };

        let err = watcher.watch(&target(), &cancel).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, StageError::Cancelled));
        assert!(cluster.polls.load(Ordering::SeqCst) < 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roll_out_applies_before_watching() {
        use crate::service::render::{ManifestRenderer, TemplateSet};
        use ferry_core::domain::tag::ImageReference;

        let cluster = Arc::new(SimulatedCluster::new(3, 3));
        let watcher = RolloutWatcher::new(cluster.clone(), settings());
        let manifests = ManifestRenderer::new(TemplateSet::builtin())
            .render(&target(), &ImageReference::new("registry", "app", "abc123"))
            .unwrap();

        let status = watcher
            .roll_out(&manifests, &target(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(status.phase(), RolloutPhase::Succeeded);
        assert_eq!(
            cluster.applied.lock().unwrap().as_slice(),
            &["Deployment".to_string(), "Service".to_string()]
        );
    }

    #[test]
    fn test_settled_requires_old_replicas_gone() {
        let health = DeploymentHealth {
            desired: 3,
            ready: 3,
            updated: 3,
            total: 4,
            blocker: None,
        };
        assert!(!is_settled(&health, 3));
        assert!(is_settled(&DeploymentHealth { total: 3, ..health }, 3));
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // Already cancelled: resolves immediately
        token.cancelled().await;
    }
}
