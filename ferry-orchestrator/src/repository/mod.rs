//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Run records live in memory for the lifetime of the process.

pub mod run;

// Re-export for convenience
pub use run as run_repository;
