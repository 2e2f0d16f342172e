//! Repository layer
//!
//! Repositories adapt external systems to the service traits. They carry
//! no pipeline logic: the cluster repository translates API objects into
//! `DeploymentHealth`, nothing more.

mod cluster;

// Re-export implementations
pub use cluster::{HttpClusterApi, detect_blocker};
