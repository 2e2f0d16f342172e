//! Deployment, replica set and pod read endpoints

use crate::ClusterClient;
use crate::error::Result;
use k8s_openapi::{List, ListableResource};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;

impl ClusterClient {
    // =============================================================================
    // Rollout Health
    // =============================================================================

    /// Get a deployment, including its status block
    pub async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let url = format!(
            "{}/apis/apps/v1/namespaces/{}/deployments/{}",
            self.base_url, namespace, name
        );
        let response = self.authorize(self.client.get(&url)).send().await?;

        self.handle_response(response).await
    }

    /// List replica sets matching a label selector
    pub async fn list_replica_sets(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<List<ReplicaSet>> {
        let url = format!(
            "{}/apis/apps/v1/namespaces/{}/replicasets",
            self.base_url, namespace
        );
        self.list(&url, label_selector).await
    }

    /// List pods matching a label selector (e.g., "app=web,tier=api")
    pub async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<List<Pod>> {
        let url = format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace);
        self.list(&url, label_selector).await
    }

    async fn list<T>(&self, url: &str, label_selector: &str) -> Result<List<T>>
    where
        T: ListableResource,
        List<T>: serde::de::DeserializeOwned,
    {
        let response = self
            .authorize(self.client.get(url))
            .query(&[("labelSelector", label_selector)])
            .send()
            .await?;

        self.handle_response(response).await
    }
}
