//! Run Repository
//!
//! In-memory store of run records shared between API handlers and the
//! background tasks executing runs. Finished runs beyond the retention cap
//! are evicted oldest first; queued and running runs are always kept.

use ferry_core::domain::run::RunRecord;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Finished runs kept when no cap is configured
pub const DEFAULT_RETAINED_RUNS: usize = 100;

/// Shared run record store
#[derive(Debug, Clone)]
pub struct RunStore {
    runs: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
    retained: usize,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_RUNS)
    }
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `retained` finished runs
    pub fn with_retention(retained: usize) -> Self {
        Self {
            runs: Arc::default(),
            retained: retained.max(1),
        }
    }

    /// Insert a new run record
    pub fn insert(&self, record: RunRecord) {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        runs.insert(record.id, record);
        evict_finished(&mut runs, self.retained);
    }

    /// Find a run by ID
    pub fn find_by_id(&self, id: Uuid) -> Option<RunRecord> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// List all runs, most recently requested first
    pub fn list_all(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        runs
    }

    /// Apply `change` to a run, returning the updated record
    pub fn update(&self, id: Uuid, change: impl FnOnce(&mut RunRecord)) -> Option<RunRecord> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let record = runs.get_mut(&id)?;
        change(record);
        let updated = record.clone();

        if updated.state.is_finished() {
            evict_finished(&mut runs, self.retained);
        }
        Some(updated)
    }
}

/// Drops the oldest finished runs until at most `retained` remain
fn evict_finished(runs: &mut HashMap<Uuid, RunRecord>, retained: usize) {
    let mut finished: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = runs
        .values()
        .filter(|r| r.state.is_finished())
        .map(|r| (r.completed_at.unwrap_or(r.requested_at), r.id))
        .collect();

    if finished.len() <= retained {
        return;
    }

    finished.sort();
    let excess = finished.len() - retained;
    for (_, id) in finished.into_iter().take(excess) {
        runs.remove(&id);
    }
    tracing::debug!("Evicted {} finished run(s)", excess);
}
