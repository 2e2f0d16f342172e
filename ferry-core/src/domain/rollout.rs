//! Rollout domain types
//!
//! `RolloutStatus` follows `Pending -> Progressing -> {Succeeded | Failed | TimedOut}`.
//! Once a terminal phase is reached every further mutation is rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rollout phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutPhase {
    Pending,
    Progressing,
    Succeeded,
    Failed,
    TimedOut,
}

impl RolloutPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Attempted mutation of a terminal rollout status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rollout already finished with phase {0:?}")]
pub struct RolloutFinished(pub RolloutPhase);

/// Observed progress of a rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStatus {
    phase: RolloutPhase,
    ready_replicas: u32,
    desired_replicas: u32,
    message: Option<String>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl RolloutStatus {
    /// A fresh status waiting for the first observation
    pub fn pending(desired_replicas: u32) -> Self {
        Self {
            phase: RolloutPhase::Pending,
            ready_replicas: 0,
            desired_replicas,
            message: None,
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    pub fn ready_replicas(&self) -> u32 {
        self.ready_replicas
    }

    pub fn desired_replicas(&self) -> u32 {
        self.desired_replicas
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn updated_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// True when every desired replica is ready
    pub fn is_fully_ready(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
    }

    /// Records a replica observation, moving `Pending` to `Progressing`
    pub fn observe(&mut self, ready_replicas: u32) -> Result<(), RolloutFinished> {
        self.ensure_open()?;
        self.ready_replicas = ready_replicas;
        self.phase = RolloutPhase::Progressing;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), RolloutFinished> {
        self.finish(RolloutPhase::Succeeded, None)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), RolloutFinished> {
        self.finish(RolloutPhase::Failed, Some(reason.into()))
    }

    pub fn time_out(&mut self) -> Result<(), RolloutFinished> {
        let message = format!(
            "{}/{} replicas ready at deadline",
            self.ready_replicas, self.desired_replicas
        );
        self.finish(RolloutPhase::TimedOut, Some(message))
    }

    fn finish(
        &mut self,
        phase: RolloutPhase,
        message: Option<String>,
    ) -> Result<(), RolloutFinished> {
        self.ensure_open()?;
        self.phase = phase;
        self.message = message;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), RolloutFinished> {
        if self.phase.is_terminal() {
            return Err(RolloutFinished(self.phase));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_progressing() {
        let mut status = RolloutStatus::pending(3);
        assert_eq!(status.phase(), RolloutPhase::Pending);

        status.observe(1).unwrap();
        assert_eq!(status.phase(), RolloutPhase::Progressing);
        assert_eq!(status.ready_replicas(), 1);
        assert!(!status.is_fully_ready());
    }

    #[test]
    fn test_terminal_status_is_frozen() {
        let mut status = RolloutStatus::pending(2);
        status.observe(2).unwrap();
        status.succeed().unwrap();

        assert_eq!(
            status.observe(0),
            Err(RolloutFinished(RolloutPhase::Succeeded))
        );
        assert!(status.fail("late").is_err());
        assert!(status.time_out().is_err());
        assert_eq!(status.ready_replicas(), 2);
        assert_eq!(status.phase(), RolloutPhase::Succeeded);
    }

    #[test]
    fn test_timeout_message() {
        let mut status = RolloutStatus::pending(3);
        status.observe(1).unwrap();
        status.time_out().unwrap();
        assert_eq!(status.message(), Some("1/3 replicas ready at deadline"));
    }
}
