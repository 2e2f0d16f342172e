//! Data Transfer Objects
//!
//! Wire types of the orchestrator's HTTP API (push events and run
//! responses). Cluster API objects come from `k8s-openapi`.

pub mod run;
