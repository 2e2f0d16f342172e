//! Core domain types
//!
//! This module contains the core domain structures used across Ferry crates.
//! These types represent the artifacts that flow through a release run and are
//! shared between the runner (which produces them) and the orchestrator
//! (which records them).

pub mod build;
pub mod deploy;
pub mod rollout;
pub mod run;
pub mod tag;
