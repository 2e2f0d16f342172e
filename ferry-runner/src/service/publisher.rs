//! Registry publisher
//!
//! Pushes a built artifact under every planned tag:
//! - Logging in once per publish (skipped for anonymous registries)
//! - Pushing all tags concurrently, each with its own retry budget
//! - Reporting success or failure per tag, never rolling back

use async_trait::async_trait;
use ferry_core::domain::build::ImageArtifact;
use ferry_core::domain::tag::{ImageReference, TagSet};
pub use ferry_core::domain::tag::TagOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::StageError;
use crate::service::builder::BackendError;

/// Registry credentials
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Image registry
#[async_trait]
pub trait Registry: Send + Sync {
    /// Authenticates against `registry`
    async fn login(
        &self,
        registry: &str,
        credentials: &RegistryCredentials,
    ) -> Result<(), BackendError>;

    /// Pushes the artifact's local image as `target`
    async fn push(&self, artifact: &ImageArtifact, target: &ImageReference)
    -> Result<(), BackendError>;
}

/// Publisher settings
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Registry host (e.g., "ghcr.io"); empty for the backend default
    pub registry: String,
    /// Push attempts per tag, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl PublishSettings {
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Per-tag publish results, in tag-set order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub outcomes: Vec<TagOutcome>,
}

impl PublishReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> Vec<&TagOutcome> {
        self.outcomes.iter().filter(|o| o.is_success()).collect()
    }

    pub fn failed(&self) -> Vec<&TagOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    pub fn failed_tags(&self) -> Vec<String> {
        self.failed().into_iter().map(|o| o.tag.clone()).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(TagOutcome::is_success)
    }
}

/// Pushes artifacts to a registry
pub struct Publisher {
    registry: Arc<dyn Registry>,
    settings: PublishSettings,
}

impl Publisher {
    pub fn new(registry: Arc<dyn Registry>, settings: PublishSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Fully qualified reference of `tag` under the configured registry
    pub fn reference(&self, tags: &TagSet, tag: &str) -> ImageReference {
        ImageReference::new(&self.settings.registry, tags.repository(), tag)
    }

    /// Publishes `artifact` under every tag in `tags`
    ///
    /// Returns the report when every tag was pushed, otherwise a
    /// `PublishFailure` carrying the same report.
    pub async fn publish(
        &self,
        artifact: &ImageArtifact,
        tags: &TagSet,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<PublishReport, StageError> {
        let report = self
            .publish_tags(artifact, tags, tags.tags(), credentials)
            .await;
        into_result(report)
    }

    /// Re-pushes only the tags that failed in `previous`
    ///
    /// Successful outcomes from `previous` are kept as they are.
    pub async fn retry_failed(
        &self,
        artifact: &ImageArtifact,
        tags: &TagSet,
        previous: PublishReport,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<PublishReport, StageError> {
        let pending = previous.failed_tags();
        if pending.is_empty() {
            return Ok(previous);
        }

        info!("Retrying {} failed tag(s)", pending.len());
        let retried = self
            .publish_tags(artifact, tags, &pending, credentials)
            .await;

        let outcomes = previous
            .outcomes
            .into_iter()
            .map(|outcome| {
                if outcome.is_success() {
                    return outcome;
                }
                retried
                    .outcomes
                    .iter()
                    .find(|r| r.tag == outcome.tag)
                    .cloned()
                    .map(|r| TagOutcome {
                        attempts: outcome.attempts + r.attempts,
                        ..r
                    })
                    .unwrap_or(outcome)
            })
            .collect();

        into_result(PublishReport { outcomes })
    }

    async fn publish_tags(
        &self,
        artifact: &ImageArtifact,
        tags: &TagSet,
        selected: &[String],
        credentials: Option<&RegistryCredentials>,
    ) -> PublishReport {
        if let Some(credentials) = credentials {
            if let Err(e) = self
                .registry
                .login(&self.settings.registry, credentials)
                .await
            {
                error!("Registry login failed: {}", e);
                return PublishReport {
                    outcomes: selected
                        .iter()
                        .map(|tag| TagOutcome {
                            tag: tag.clone(),
                            reference: self.reference(tags, tag).to_string(),
                            attempts: 0,
                            error: Some(format!("login failed: {}", e)),
                        })
                        .collect(),
                };
            }
        }

        let handles: Vec<_> = selected
            .iter()
            .map(|tag| {
                let registry = Arc::clone(&self.registry);
                let settings = self.settings.clone();
                let artifact = artifact.clone();
                let target = self.reference(tags, tag);
                let tag = tag.clone();

                tokio::spawn(async move {
                    push_with_retry(registry.as_ref(), &settings, &artifact, &target, tag).await
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (handle, tag) in handles.into_iter().zip(selected) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => TagOutcome {
                    tag: tag.clone(),
                    reference: self.reference(tags, tag).to_string(),
                    attempts: 0,
                    error: Some(format!("push task failed: {}", e)),
                },
            };
            outcomes.push(outcome);
        }

        PublishReport { outcomes }
    }
}

fn into_result(report: PublishReport) -> Result<PublishReport, StageError> {
    if report.all_succeeded() {
        Ok(report)
    } else {
        Err(StageError::PublishFailure(report))
    }
}

/// Pushes one tag, retrying with exponential backoff
async fn push_with_retry(
    registry: &dyn Registry,
    settings: &PublishSettings,
    artifact: &ImageArtifact,
    target: &ImageReference,
    tag: String,
) -> TagOutcome {
    let max_attempts = settings.max_attempts.max(1);
    let mut delay = settings.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match registry.push(artifact, target).await {
            Ok(()) => {
                info!("Pushed {} (attempt {})", target, attempt);
                return TagOutcome {
                    tag,
                    reference: target.to_string(),
                    attempts: attempt,
                    error: None,
                };
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!("Failed to push {} after {} attempt(s): {}", target, attempt, e);
                    return TagOutcome {
                        tag,
                        reference: target.to_string(),
                        attempts: attempt,
                        error: Some(e.to_string()),
                    };
                }

                warn!(
                    "Failed to push {} (attempt {}/{}): {}",
                    target, attempt, max_attempts, e
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(settings.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Registry failing a configurable number of times per tag
    #[derive(Default)]
    struct FakeRegistry {
        failures_left: Mutex<HashMap<String, u32>>,
        pushed: Mutex<Vec<String>>,
        reject_login: bool,
    }

    impl FakeRegistry {
        fn failing(tag: &str, times: u32) -> Self {
            let registry = Self::default();
            registry
                .failures_left
                .lock()
                .unwrap()
                .insert(tag.to_string(), times);
            registry
        }
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn login(
            &self,
            _registry: &str,
            _credentials: &RegistryCredentials,
        ) -> Result<(), BackendError> {
            if self.reject_login {
                return Err(BackendError::new("unauthorized"));
            }
            Ok(())
        }

        async fn push(
            &self,
            _artifact: &ImageArtifact,
            target: &ImageReference,
        ) -> Result<(), BackendError> {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(&target.tag) {
                if *left > 0 {
                    *left -= 1;
                    return Err(BackendError::new("connection reset"));
                }
            }
            self.pushed.lock().unwrap().push(target.to_string());
            Ok(())
        }
    }

    fn artifact() -> ImageArtifact {
        ImageArtifact {
            digest: "sha256:d".to_string(),
            size_bytes: 1,
            created_at: chrono::Utc::now(),
            local_ref: "app:build-0001".to_string(),
            platforms: vec!["linux/amd64".to_string()],
            cache_key: "0001".to_string(),
        }
    }

    fn tags() -> TagSet {
        TagSet::new("app", vec!["latest".into(), "abc123".into()]).unwrap()
    }

    fn settings(max_attempts: u32) -> PublishSettings {
        PublishSettings {
            max_attempts,
            ..PublishSettings::new("registry.local")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_all_tags() {
        let registry = Arc::new(FakeRegistry::default());
        let publisher = Publisher::new(registry.clone(), settings(3));

        let report = publisher.publish(&artifact(), &tags(), None).await.unwrap();

        assert_eq!(report.len(), 2);
        assert!(report.all_succeeded());
        assert_eq!(report.outcomes[0].reference, "registry.local/app:latest");
        assert_eq!(report.outcomes[1].reference, "registry.local/app:abc123");
        assert_eq!(registry.pushed.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let registry = Arc::new(FakeRegistry::failing("abc123", 2));
        let publisher = Publisher::new(registry, settings(3));

        let report = publisher.publish(&artifact(), &tags(), None).await.unwrap();

        assert_eq!(report.outcomes[1].attempts, 3);
        assert!(report.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_reported_per_tag() {
        let registry = Arc::new(FakeRegistry::failing("abc123", u32::MAX));
        let publisher = Publisher::new(registry.clone(), settings(2));

        let err = publisher
            .publish(&artifact(), &tags(), None)
            .await
            .unwrap_err();

        let StageError::PublishFailure(report) = err else {
            panic!("expected publish failure");
        };
        assert_eq!(report.succeeded().len(), 1);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed_tags(), vec!["abc123".to_string()]);
        assert_eq!(report.failed()[0].attempts, 2);
        // The successful push is not rolled back
        assert_eq!(
            registry.pushed.lock().unwrap().as_slice(),
            &["registry.local/app:latest".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_only_pushes_failures() {
        let registry = Arc::new(FakeRegistry::failing("abc123", 1));
        let publisher = Publisher::new(registry.clone(), settings(1));

        let Err(StageError::PublishFailure(first)) =
            publisher.publish(&artifact(), &tags(), None).await
        else {
            panic!("expected publish failure");
        };

        let report = publisher
            .retry_failed(&artifact(), &tags(), first, None)
            .await
            .unwrap();

        assert!(report.all_succeeded());
        assert_eq!(report.outcomes[1].attempts, 2);
        let pushed = registry.pushed.lock().unwrap();
        assert_eq!(
            pushed.iter().filter(|r| r.ends_with(":latest")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_login_failure_fails_every_tag() {
        let registry = Arc::new(FakeRegistry {
            reject_login: true,
            ..Default::default()
        });
        let publisher = Publisher::new(registry.clone(), settings(3));
        let credentials = RegistryCredentials {
            username: "ci".into(),
            password: "secret".into(),
        };

        let Err(StageError::PublishFailure(report)) = publisher
            .publish(&artifact(), &tags(), Some(&credentials))
            .await
        else {
            panic!("expected publish failure");
        };

        assert_eq!(report.failed().len(), 2);
        assert!(registry.pushed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = RegistryCredentials {
            username: "ci".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("ci"));
        assert!(!debug.contains("hunter2"));
    }
}
