//! Build domain types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Platform used when a build spec does not list any
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Description of a container image build
///
/// Immutable once a build starts: the builder only ever borrows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Image repository the build belongs to (e.g., "team/app")
    pub repository: String,
    /// Build context directory
    pub context_dir: PathBuf,
    /// Dockerfile path, relative to the context directory
    pub dockerfile: PathBuf,
    /// Glob-style patterns excluded from the build context
    pub excludes: Vec<String>,
    /// Target platforms (e.g., "linux/amd64")
    pub platforms: Vec<String>,
}

impl BuildSpec {
    /// Creates a build spec with the default Dockerfile and platform
    pub fn new(repository: impl Into<String>, context_dir: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            context_dir: context_dir.into(),
            dockerfile: PathBuf::from("Dockerfile"),
            excludes: Vec::new(),
            platforms: vec![DEFAULT_PLATFORM.to_string()],
        }
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_dockerfile(mut self, dockerfile: impl Into<PathBuf>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    /// True when more than one platform is targeted (multi-arch manifest build)
    pub fn is_multi_platform(&self) -> bool {
        self.platforms.len() > 1
    }
}

/// A built, content-addressed container image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Content digest (e.g., "sha256:4f1c...")
    pub digest: String,
    /// Image size in bytes
    pub size_bytes: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Backend-local reference the image was built under
    pub local_ref: String,
    /// Platforms the image was built for; more than one means a manifest list
    pub platforms: Vec<String>,
    /// Build cache key the artifact was produced for
    pub cache_key: String,
}

impl ImageArtifact {
    pub fn is_manifest_list(&self) -> bool {
        self.platforms.len() > 1
    }

    /// Short form of the digest for display (first 12 hex characters)
    pub fn short_digest(&self) -> &str {
        let hex = self
            .digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest);
        &hex[..12.min(hex.len())]
    }
}
