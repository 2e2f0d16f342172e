//! Error taxonomy for release runs
//!
//! Every stage surfaces a `StageError`; the run driver wraps it in a
//! `RunError` naming the stage that failed.

use ferry_core::domain::rollout::RolloutStatus;
use ferry_core::domain::run::{RunFailure, Stage};
use ferry_core::domain::tag::TagSetError;
use std::path::PathBuf;
use thiserror::Error;

use crate::service::publisher::PublishReport;

/// Errors raised by a single pipeline stage
#[derive(Debug, Error)]
pub enum StageError {
    /// The backend could not build the image; needs a source change
    #[error("build failed: {message}")]
    BuildFailure { message: String, diagnostics: String },

    /// Tags could not be planned
    #[error(transparent)]
    Tag(#[from] TagError),

    /// At least one tag was not pushed; carries the per-tag report
    #[error("publish failed for {} of {} tag(s)", .0.failed().len(), .0.len())]
    PublishFailure(PublishReport),

    /// Templates or configuration are defective
    #[error("render failed: {0}")]
    RenderFailure(#[from] RenderError),

    /// Desired replicas were not healthy before the deadline
    #[error("rollout timed out: {}", .status.message().unwrap_or("deadline elapsed"))]
    RolloutTimeout { status: RolloutStatus },

    /// The cluster reported a permanent error
    #[error("rollout failed: {reason}")]
    RolloutFailure {
        reason: String,
        status: Option<RolloutStatus>,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl StageError {
    /// Whether re-invoking the same stage without changes may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PublishFailure(_) | Self::RolloutTimeout { .. })
    }

    /// Per-tag results carried by a partial publish failure
    pub fn publish_report(&self) -> Option<&PublishReport> {
        match self {
            Self::PublishFailure(report) => Some(report),
            _ => None,
        }
    }

    /// Last rollout status carried by watch errors
    pub fn rollout_status(&self) -> Option<&RolloutStatus> {
        match self {
            Self::RolloutTimeout { status } => Some(status),
            Self::RolloutFailure { status, .. } => status.as_ref(),
            _ => None,
        }
    }
}

/// Tag planning errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("missing provenance: no commit identifier available for this build")]
    MissingProvenance,

    #[error("invalid commit identifier '{0}'")]
    InvalidCommit(String),

    #[error("invalid repository '{0}'")]
    InvalidRepository(String),

    #[error(transparent)]
    InvalidTagSet(#[from] TagSetError),
}

/// Manifest rendering errors
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unresolved placeholder '{field}' in template '{template}'")]
    UnresolvedPlaceholder { template: String, field: String },

    #[error("invalid template '{template}': {message}")]
    InvalidTemplate { template: String, message: String },

    #[error("failed to read templates from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// A failed run: the stage that halted the pipeline and its cause
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

impl RunError {
    pub fn new(stage: Stage, source: StageError) -> Self {
        Self { stage, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, StageError::Cancelled)
    }

    /// Serializable summary for run records
    pub fn to_failure(&self) -> RunFailure {
        RunFailure {
            stage: self.stage,
            message: self.source.to_string(),
            retryable: self.source.is_retryable(),
        }
    }
}
