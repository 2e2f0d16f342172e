//! Release run domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::rollout::RolloutStatus;
use crate::domain::tag::TagOutcome;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Build,
    Tag,
    Publish,
    Render,
    Watch,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Build,
        Stage::Tag,
        Stage::Publish,
        Stage::Render,
        Stage::Watch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Tag => "tag",
            Stage::Publish => "publish",
            Stage::Render => "render",
            Stage::Watch => "watch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunTrigger {
    Manual,
    Push { branch: String },
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Release run record
///
/// Structure kept by the orchestrator and updated as the runner progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub commit: Option<String>,
    pub state: RunState,
    pub stage: Option<Stage>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub digest: Option<String>,
    pub tags: Vec<String>,
    /// Per-tag publish results, including failed pushes
    #[serde(default)]
    pub published: Vec<TagOutcome>,
    pub rollout: Option<RolloutStatus>,
    pub failure: Option<RunFailure>,
}

impl RunRecord {
    /// Creates a queued run record
    pub fn queued(trigger: RunTrigger, commit: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            commit,
            state: RunState::Queued,
            stage: None,
            requested_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            digest: None,
            tags: Vec::new(),
            published: Vec::new(),
            rollout: None,
            failure: None,
        }
    }
}

/// Stage and cause of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub message: String,
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::ALL[0], Stage::Build);
        assert_eq!(Stage::ALL[4], Stage::Watch);
        assert_eq!(Stage::Publish.to_string(), "publish");
    }

    #[test]
    fn test_queued_record() {
        let record = RunRecord::queued(RunTrigger::Manual, Some("abc123".into()));
        assert_eq!(record.state, RunState::Queued);
        assert!(record.stage.is_none());
        assert!(record.published.is_empty());
        assert!(!record.state.is_finished());
    }
}
