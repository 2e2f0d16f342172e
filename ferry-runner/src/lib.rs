//! Ferry Runner
//!
//! The release pipeline as a library: build a container image, tag it,
//! publish it, render manifests with the published tag and watch the
//! rollout until it is healthy.
//!
//! Architecture:
//! - Configuration: `ferry.yaml` plus secrets from the environment
//! - Services: one module per pipeline stage and the run driver
//! - Repositories: the HTTP cluster adapter behind `ClusterApi`
//! - Backends: podman behind `BuildBackend` and `Registry`
//! - Cache: content-addressed build cache on disk
//!
//! Binaries (the CLI and the webhook orchestrator) wire these together.

pub mod cache;
pub mod config;
pub mod error;
pub mod podman;
pub mod repository;
pub mod service;

pub use config::{Environment, ReleaseConfig};
pub use error::{RunError, StageError};
