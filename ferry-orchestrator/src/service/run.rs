//! Run Service
//!
//! Business logic for webhook-triggered release runs:
//! - Filtering push events down to the designated branch
//! - Executing runs in background tasks, bounded by a semaphore
//! - Tracking run progress in the run repository
//! - Cancelling queued or running runs

use ferry_core::domain::build::ImageArtifact;
use ferry_core::domain::run::{RunFailure, RunRecord, RunState, RunTrigger, Stage};
use ferry_core::domain::tag::TagSet;
use ferry_core::dto::run::{CancelResponse, PushEvent, TriggerResponse};
use ferry_runner::service::{
    CancelToken, PublishReport, ReleaseRequest, ReleaseRunner, RunObserver,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::repository::run_repository::RunStore;
use crate::service::checkout::SourceCheckout;

/// Service error type
#[derive(Debug)]
pub enum RunError {
    NotFound(Uuid),
    InvalidState(String),
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, RunError>;

/// Launches and tracks release runs
#[derive(Clone)]
pub struct RunService {
    store: RunStore,
    runner: Arc<ReleaseRunner>,
    /// Request every run starts from; the commit is filled in per run
    template: ReleaseRequest,
    checkout: Arc<dyn SourceCheckout>,
    branch: String,
    permits: Arc<Semaphore>,
    cancels: Arc<Mutex<HashMap<Uuid, CancelToken>>>,
}

impl RunService {
    /// # Arguments
    /// * `runner` - Pipeline executing each run
    /// * `template` - Base request (build spec, target, credentials)
    /// * `checkout` - Prepares the source tree for the pushed commit
    /// * `branch` - Only pushes to this branch start runs
    /// * `max_concurrent_runs` - Runs executing at once; later runs queue
    pub fn new(
        runner: Arc<ReleaseRunner>,
        template: ReleaseRequest,
        checkout: Arc<dyn SourceCheckout>,
        branch: impl Into<String>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            store: RunStore::new(),
            runner,
            template,
            checkout,
            branch: branch.into(),
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Keep at most `retained` finished runs
    pub fn with_retention(mut self, retained: usize) -> Self {
        self.store = RunStore::with_retention(retained);
        self
    }

    /// Handle a push event
    ///
    /// Pushes to the designated branch start a run; any other ref, and
    /// branch deletions, are acknowledged without starting one.
    pub fn handle_push(&self, event: PushEvent) -> Result<TriggerResponse> {
        validate_push_event(&event)?;

        let Some(branch) = event.branch() else {
            return Ok(ignored(format!("{} is not a branch", event.git_ref)));
        };

        if branch != self.branch {
            tracing::debug!("Ignoring push to {} (watching {})", branch, self.branch);
            return Ok(ignored(format!(
                "branch {} is not {}",
                branch, self.branch
            )));
        }

        if event.is_deletion() {
            return Ok(ignored(format!("branch {} was deleted", branch)));
        }

        let record = RunRecord::queued(
            RunTrigger::Push {
                branch: branch.to_string(),
            },
            Some(event.after.clone()),
        );
        let run_id = self.launch(record);

        tracing::info!(
            "Run {} queued for {} at {}{}",
            run_id,
            branch,
            event.after,
            event
                .repository
                .as_ref()
                .map(|r| format!(" ({})", r.full_name))
                .unwrap_or_default()
        );

        Ok(TriggerResponse {
            accepted: true,
            run_id: Some(run_id),
            reason: None,
        })
    }

    /// Get a run by ID
    pub fn get_run(&self, id: Uuid) -> Result<RunRecord> {
        self.store.find_by_id(id).ok_or(RunError::NotFound(id))
    }

    /// List all runs
    pub fn list_runs(&self) -> Vec<RunRecord> {
        self.store.list_all()
    }

    /// Request cancellation of a queued or running run
    ///
    /// Cancellation is cooperative: the returned state is the state at the
    /// time of the request, the run settles as `Cancelled` shortly after.
    pub fn cancel_run(&self, id: Uuid) -> Result<CancelResponse> {
        let record = self.get_run(id)?;

        if record.state.is_finished() {
            return Err(RunError::InvalidState(format!(
                "Run {} already finished ({:?})",
                id, record.state
            )));
        }

        if let Some(token) = self.cancels().get(&id) {
            token.cancel();
        }

        tracing::info!("Cancellation requested for run {}", id);

        Ok(CancelResponse {
            run_id: id,
            state: record.state,
        })
    }

    /// Store the record and execute it in a background task
    fn launch(&self, record: RunRecord) -> Uuid {
        let run_id = record.id;
        let cancel = CancelToken::new();

        self.store.insert(record.clone());
        self.cancels().insert(run_id, cancel.clone());

        let service = self.clone();
        tokio::spawn(async move {
            service.execute(record, cancel).await;
            service.cancels().remove(&run_id);
        });

        run_id
    }

    async fn execute(&self, record: RunRecord, cancel: CancelToken) {
        let run_id = record.id;

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => permit,
            _ = cancel.cancelled() => {
                tracing::info!("Run {} cancelled while queued", run_id);
                self.finish(run_id, RunState::Cancelled);
                return;
            }
        };
        let Ok(_permit) = permit else {
            tracing::error!("Run semaphore closed, dropping run {}", run_id);
            return;
        };

        self.store.update(run_id, |r| {
            r.state = RunState::Running;
            r.started_at = Some(chrono::Utc::now());
        });

        let commit = record.commit.clone().unwrap_or_default();
        if let Err(e) = self.checkout.checkout(&commit).await {
            tracing::error!("Run {} checkout failed: {:#}", run_id, e);
            self.store.update(run_id, |r| {
                r.state = RunState::Failed;
                r.stage = Some(Stage::Build);
                r.failure = Some(RunFailure {
                    stage: Stage::Build,
                    message: format!("checkout of {} failed: {:#}", commit, e),
                    retryable: true,
                });
                r.completed_at = Some(chrono::Utc::now());
            });
            return;
        }

        let mut request = self.template.clone();
        request.commit = record.commit.clone();

        let observer = RecordObserver {
            store: self.store.clone(),
        };

        match self.runner.run(run_id, &request, &cancel, &observer).await {
            Ok(report) => {
                self.store.update(run_id, |r| {
                    r.rollout = Some(report.rollout.clone());
                });
                self.finish(run_id, RunState::Succeeded);
            }
            Err(e) => {
                let state = if e.is_cancelled() {
                    RunState::Cancelled
                } else {
                    RunState::Failed
                };
                self.store.update(run_id, |r| {
                    r.stage = Some(e.stage);
                    r.rollout = e.source.rollout_status().cloned();
                    if let Some(report) = e.source.publish_report() {
                        r.published = report.outcomes.clone();
                    }
                    if state == RunState::Failed {
                        r.failure = Some(e.to_failure());
                    }
                });
                self.finish(run_id, state);
            }
        }
    }

    fn finish(&self, run_id: Uuid, state: RunState) {
        self.store.update(run_id, |r| {
            r.state = state;
            r.completed_at = Some(chrono::Utc::now());
        });
        tracing::info!("Run {} finished: {:?}", run_id, state);
    }

    fn cancels(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancelToken>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mirrors run progress into the run repository
struct RecordObserver {
    store: RunStore,
}

impl RunObserver for RecordObserver {
    fn stage_started(&self, run_id: Uuid, stage: Stage) {
        self.store.update(run_id, |r| r.stage = Some(stage));
    }

    fn artifact_built(&self, run_id: Uuid, artifact: &ImageArtifact) {
        self.store
            .update(run_id, |r| r.digest = Some(artifact.digest.clone()));
    }

    fn tags_planned(&self, run_id: Uuid, tags: &TagSet) {
        self.store.update(run_id, |r| r.tags = tags.tags().to_vec());
    }

    fn tags_published(&self, run_id: Uuid, report: &PublishReport) {
        self.store
            .update(run_id, |r| r.published = report.outcomes.clone());
    }
}

fn ignored(reason: String) -> TriggerResponse {
    TriggerResponse {
        accepted: false,
        run_id: None,
        reason: Some(reason),
    }
}

/// Validate a push event
fn validate_push_event(event: &PushEvent) -> Result<()> {
    if event.git_ref.trim().is_empty() {
        return Err(RunError::ValidationError("ref cannot be empty".to_string()));
    }

    if event.after.trim().is_empty() {
        return Err(RunError::ValidationError(
            "after cannot be empty".to_string(),
        ));
    }

    if !event.after.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RunError::ValidationError(format!(
            "after '{}' is not a commit identifier",
            event.after
        )));
    }

    Ok(())
}
