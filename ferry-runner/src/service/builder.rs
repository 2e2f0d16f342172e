//! Image builder service
//!
//! Turns a `BuildSpec` into an `ImageArtifact`:
//! - Hashing the build context into a cache key
//! - Reusing a cached artifact when the backend still holds its image
//! - Invoking the build backend otherwise and recording the result

use async_trait::async_trait;
use ferry_core::domain::build::{BuildSpec, ImageArtifact};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{BuildCache, compute_cache_key};
use crate::error::StageError;

/// Number of key characters used in the local image reference
const LOCAL_REF_KEY_LEN: usize = 12;

/// Failure reported by a container backend command
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// Captured backend output, most recent lines last
    pub diagnostics: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: String::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }
}

/// Image metadata reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    pub digest: String,
    pub size_bytes: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Container build backend
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Builds `spec` and stores the result under `local_ref`
    ///
    /// # Arguments
    /// * `spec` - What to build
    /// * `local_ref` - Backend-local image reference to produce
    /// * `ignore_file` - File listing build-context exclude patterns
    async fn build(
        &self,
        spec: &BuildSpec,
        local_ref: &str,
        ignore_file: &Path,
    ) -> Result<(), BackendError>;

    /// Reads image metadata, `None` when the backend has no such image
    async fn inspect(
        &self,
        local_ref: &str,
        spec: &BuildSpec,
    ) -> Result<Option<ImageDetails>, BackendError>;
}

/// Builds images through a backend, consulting the build cache first
pub struct ImageBuilder {
    backend: Arc<dyn BuildBackend>,
    cache: BuildCache,
}

impl ImageBuilder {
    pub fn new(backend: Arc<dyn BuildBackend>, cache: BuildCache) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Builds the image described by `spec`
    pub async fn build(&self, spec: &BuildSpec) -> Result<ImageArtifact, StageError> {
        let key = {
            let owned = spec.clone();
            tokio::task::spawn_blocking(move || compute_cache_key(&owned))
                .await
                .map_err(|e| build_failure(format!("context hashing task failed: {}", e)))?
                .map_err(|e| {
                    build_failure(format!(
                        "failed to read build context {}: {}",
                        spec.context_dir.display(),
                        e
                    ))
                })?
        };
        let local_ref = local_reference(&spec.repository, &key);

        info!("Building {} (cache key {})", local_ref, &key[..LOCAL_REF_KEY_LEN]);

        if let Some(cached) = self.cache.lookup(&key) {
            match self.backend.inspect(&cached.local_ref, spec).await {
                Ok(Some(_)) => {
                    info!(
                        "Build cache hit for {}, reusing {}",
                        cached.local_ref, cached.digest
                    );
                    return Ok(cached);
                }
                Ok(None) => {
                    debug!("Cached image {} no longer present, rebuilding", cached.local_ref);
                }
                Err(e) => {
                    warn!("Failed to inspect cached image {}: {}", cached.local_ref, e);
                }
            }
        }

        let ignore_file = self
            .cache
            .write_ignore_file(&key, &spec.excludes)
            .map_err(|e| build_failure(format!("failed to write ignore file: {}", e)))?;

        self.backend
            .build(spec, &local_ref, &ignore_file)
            .await
            .map_err(|e| StageError::BuildFailure {
                message: e.message,
                diagnostics: e.diagnostics,
            })?;

        let details = self
            .backend
            .inspect(&local_ref, spec)
            .await
            .map_err(|e| StageError::BuildFailure {
                message: e.message,
                diagnostics: e.diagnostics,
            })?
            .ok_or_else(|| build_failure(format!("image {} missing after build", local_ref)))?;

        let artifact = ImageArtifact {
            digest: details.digest,
            size_bytes: details.size_bytes,
            created_at: details.created_at,
            local_ref,
            platforms: spec.platforms.clone(),
            cache_key: key,
        };

        match self.cache.record(&artifact) {
            Ok(true) => debug!("Recorded cache entry {}", artifact.cache_key),
            Ok(false) => {}
            Err(e) => warn!("Failed to record cache entry {}: {}", artifact.cache_key, e),
        }

        info!(
            "Built {} ({} bytes, digest {})",
            artifact.local_ref, artifact.size_bytes, artifact.digest
        );

        Ok(artifact)
    }
}

/// Local reference derived from the content key
pub fn local_reference(repository: &str, key: &str) -> String {
    format!(
        "{}:build-{}",
        repository,
        &key[..LOCAL_REF_KEY_LEN.min(key.len())]
    )
}

fn build_failure(message: String) -> StageError {
    StageError::BuildFailure {
        message,
        diagnostics: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that records builds and keeps "images" in memory
    #[derive(Default)]
    struct FakeBackend {
        builds: AtomicUsize,
        images: Mutex<Vec<String>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl BuildBackend for FakeBackend {
        async fn build(
            &self,
            _spec: &BuildSpec,
            local_ref: &str,
            ignore_file: &Path,
        ) -> Result<(), BackendError> {
            assert!(ignore_file.exists());
            self.builds.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_with {
                return Err(BackendError::new(message.clone())
                    .with_diagnostics("STEP 2/4: RUN npm ci\nnpm ERR! missing lockfile"));
            }
            self.images.lock().unwrap().push(local_ref.to_string());
            Ok(())
        }

        async fn inspect(
            &self,
            local_ref: &str,
            _spec: &BuildSpec,
        ) -> Result<Option<ImageDetails>, BackendError> {
            let present = self.images.lock().unwrap().iter().any(|i| i == local_ref);
            Ok(present.then(|| ImageDetails {
                digest: "sha256:d1g357".to_string(),
                size_bytes: 1024,
                created_at: chrono::Utc::now(),
            }))
        }
    }

    fn context() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM node:20-alpine\n").unwrap();
        std::fs::write(dir.path().join("index.js"), "console.log('ok')\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_build_produces_artifact() {
        let ctx = context();
        let cache_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let builder = ImageBuilder::new(backend.clone(), BuildCache::new(cache_dir.path()));

        let artifact = builder.build(&BuildSpec::new("app", ctx.path())).await.unwrap();

        assert_eq!(artifact.digest, "sha256:d1g357");
        assert!(artifact.local_ref.starts_with("app:build-"));
        assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backend() {
        let ctx = context();
        let cache_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let builder = ImageBuilder::new(backend.clone(), BuildCache::new(cache_dir.path()));
        let spec = BuildSpec::new("app", ctx.path());

        let first = builder.build(&spec).await.unwrap();
        let second = builder.build(&spec).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_cached_image_rebuilds() {
        let ctx = context();
        let cache_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let builder = ImageBuilder::new(backend.clone(), BuildCache::new(cache_dir.path()));
        let spec = BuildSpec::new("app", ctx.path());

        builder.build(&spec).await.unwrap();
        backend.images.lock().unwrap().clear();
        builder.build(&spec).await.unwrap();

        assert_eq!(backend.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_build_failure_keeps_diagnostics() {
        let ctx = context();
        let cache_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            fail_with: Some("podman build exited with code 1".to_string()),
            ..Default::default()
        });
        let builder = ImageBuilder::new(backend, BuildCache::new(cache_dir.path()));

        let err = builder
            .build(&BuildSpec::new("app", ctx.path()))
            .await
            .unwrap_err();

        match err {
            StageError::BuildFailure {
                message,
                diagnostics,
            } => {
                assert!(message.contains("exited with code 1"));
                assert!(diagnostics.contains("npm ERR!"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_context_is_build_failure() {
        let cache_dir = tempfile::tempdir().unwrap();
        let builder = ImageBuilder::new(
            Arc::new(FakeBackend::default()),
            BuildCache::new(cache_dir.path()),
        );

        let err = builder
            .build(&BuildSpec::new("app", "/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::BuildFailure { .. }));
    }
}
