//! Ferry Cluster Client
//!
//! A small, type-safe HTTP client for the Kubernetes-compatible cluster API
//! used by the rollout watcher.
//!
//! # Example
//!
//! ```no_run
//! use ferry_client::ClusterClient;
//!
//! #[tokio::main]
//! async fn main() -> ferry_client::Result<()> {
//!     let client = ClusterClient::new("https://10.0.0.1:6443").with_token("secret");
//!
//!     let deployment = client.get_deployment("default", "app").await?;
//!     println!("ready: {:?}", deployment.status.and_then(|s| s.ready_replicas));
//!     Ok(())
//! }
//! ```

mod apply;
mod deployments;
mod discovery;
pub mod error;

pub use apply::resource_path;
pub use discovery::{find_resource, group_version_path};
pub use error::{ClientError, Result};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "ferry";

/// HTTP client for the cluster API
///
/// Groups of endpoints:
/// - API discovery (kind to resource name)
/// - Manifest application (server-side apply, create-or-update)
/// - Deployment, replica set and pod reads for rollout health
#[derive(Debug, Clone)]
pub struct ClusterClient {
    /// Base URL of the cluster API (e.g., "https://10.0.0.1:6443")
    base_url: String,
    /// Bearer token, if the cluster requires one
    token: Option<String>,
    /// HTTP client instance
    client: Client,
    /// Discovery documents by group version, shared between clones
    discovery: Arc<RwLock<HashMap<String, APIResourceList>>>,
}

impl ClusterClient {
    /// Create a new cluster client
    ///
    /// # Example
    /// ```
    /// use ferry_client::ClusterClient;
    ///
    /// let client = ClusterClient::new("https://10.0.0.1:6443/");
    /// assert_eq!(client.base_url(), "https://10.0.0.1:6443");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new cluster client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, custom CA roots, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
            discovery: Arc::default(),
        }
    }

    /// Attach a bearer token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the cluster API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status.as_u16(), &body));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Check the status code and discard the body
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status.as_u16(), &body));
        }

        Ok(())
    }
}
