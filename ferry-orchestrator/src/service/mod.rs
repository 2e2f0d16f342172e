//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services decide which pushes start runs and drive runs in the background.

pub mod checkout;
pub mod run;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export for convenience
pub use run as run_service;
