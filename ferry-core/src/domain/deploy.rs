//! Deployment target types
//!
//! Describes where and how a release is rolled out: cluster endpoint,
//! namespace, replica count, resource bounds and probe timing.

use serde::{Deserialize, Serialize};

/// Cluster deployment target for a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Cluster API base URL (e.g., "https://10.0.0.1:6443")
    pub cluster_url: String,
    pub namespace: String,
    /// Deployment and Service name, also used as the `app` label
    pub name: String,
    /// Container port the application listens on
    pub port: u16,
    pub replicas: u32,
    pub resources: ResourceBounds,
    pub liveness: ProbeSettings,
    pub readiness: ProbeSettings,
}

impl DeploymentTarget {
    /// Creates a target with default resources and probes
    pub fn new(
        cluster_url: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        port: u16,
        replicas: u32,
    ) -> Self {
        Self {
            cluster_url: cluster_url.into(),
            namespace: namespace.into(),
            name: name.into(),
            port,
            replicas,
            resources: ResourceBounds::default(),
            liveness: ProbeSettings::liveness_default(),
            readiness: ProbeSettings::readiness_default(),
        }
    }
}

/// CPU and memory quantities in cluster notation (e.g., "250m", "256Mi")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePair {
    pub cpu: String,
    pub memory: String,
}

/// Resource request/limit pair for the application container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBounds {
    pub requests: ResourcePair,
    pub limits: ResourcePair,
}

impl Default for ResourceBounds {
    fn default() -> Self {
        Self {
            requests: ResourcePair {
                cpu: "100m".to_string(),
                memory: "128Mi".to_string(),
            },
            limits: ResourcePair {
                cpu: "500m".to_string(),
                memory: "512Mi".to_string(),
            },
        }
    }
}

/// HTTP health-check parameters for one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// HTTP path probed on the container port
    pub path: String,
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
    pub timeout_seconds: u32,
    pub failure_threshold: u32,
}

impl ProbeSettings {
    pub fn liveness_default() -> Self {
        Self {
            path: "/".to_string(),
            initial_delay_seconds: 15,
            period_seconds: 20,
            timeout_seconds: 5,
            failure_threshold: 3,
        }
    }

    pub fn readiness_default() -> Self {
        Self {
            path: "/".to_string(),
            initial_delay_seconds: 5,
            period_seconds: 10,
            timeout_seconds: 3,
            failure_threshold: 3,
        }
    }
}
