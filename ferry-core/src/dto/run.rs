//! Run DTOs for the orchestrator HTTP API

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::RunState;

/// Source-control push event (GitHub-compatible subset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    /// Pushed ref (e.g., "refs/heads/main")
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit the ref points to after the push
    pub after: String,
    #[serde(default)]
    pub repository: Option<PushRepository>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
}

impl PushEvent {
    /// Branch name when the ref is a branch ref
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// True when the push deleted the ref (all-zero `after`)
    pub fn is_deletion(&self) -> bool {
        !self.after.is_empty() && self.after.chars().all(|c| c == '0')
    }
}

/// Response to a push event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    pub run_id: Option<Uuid>,
    pub reason: Option<String>,
}

/// Response to a cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    pub state: RunState,
}
