//! Manifest application endpoints

use crate::discovery::group_version_path;
use crate::error::{ClientError, Result};
use crate::{ClusterClient, FIELD_MANAGER};

const APPLY_CONTENT_TYPE: &str = "application/apply-patch+yaml";

impl ClusterClient {
    // =============================================================================
    // Server-Side Apply
    // =============================================================================

    /// Apply a manifest with create-or-update semantics
    ///
    /// Uses server-side apply, forcing ownership of conflicting fields so
    /// that repeated releases converge on the rendered state.
    ///
    /// # Arguments
    /// * `api_version` - Manifest `apiVersion` (e.g., "apps/v1")
    /// * `kind` - Manifest `kind` (e.g., "Deployment")
    /// * `namespace` - Target namespace
    /// * `name` - Resource name
    /// * `body` - The manifest document (YAML or JSON)
    pub async fn apply_manifest(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        body: String,
    ) -> Result<()> {
        check_identity(api_version, kind, namespace, name)?;

        let resource = self.resolve_resource(api_version, kind).await?;
        if !resource.namespaced {
            return Err(ClientError::InvalidResource(format!(
                "{} is cluster-scoped; only namespaced resources can be released",
                kind
            )));
        }

        let path = resource_path(api_version, &resource.name, namespace, name);
        let url = format!(
            "{}{}?fieldManager={}&force=true",
            self.base_url, path, FIELD_MANAGER
        );

        tracing::debug!("Applying {} {}/{}", kind, namespace, name);

        let response = self
            .authorize(self.client.patch(&url))
            .header(reqwest::header::CONTENT_TYPE, APPLY_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}

fn check_identity(api_version: &str, kind: &str, namespace: &str, name: &str) -> Result<()> {
    if api_version.is_empty() || kind.is_empty() || namespace.is_empty() || name.is_empty() {
        return Err(ClientError::InvalidResource(format!(
            "incomplete resource identity: apiVersion={:?} kind={:?} namespace={:?} name={:?}",
            api_version, kind, namespace, name
        )));
    }
    Ok(())
}

/// Build the REST path of a namespaced resource
///
/// `resource` is the plural name reported by discovery (e.g., "deployments").
pub fn resource_path(api_version: &str, resource: &str, namespace: &str, name: &str) -> String {
    format!(
        "{}/namespaces/{}/{}/{}",
        group_version_path(api_version),
        namespace,
        resource,
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_resource_path() {
        let path = resource_path("apps/v1", "deployments", "default", "app");
        assert_eq!(path, "/apis/apps/v1/namespaces/default/deployments/app");
    }

    #[test]
    fn test_core_resource_path() {
        let path = resource_path("v1", "services", "web", "app");
        assert_eq!(path, "/api/v1/namespaces/web/services/app");
    }

    #[test]
    fn test_incomplete_identity_rejected() {
        assert!(check_identity("apps/v1", "Deployment", "", "app").is_err());
        assert!(check_identity("", "Deployment", "default", "app").is_err());
        assert!(check_identity("apps/v1", "Deployment", "default", "app").is_ok());
    }

    #[tokio::test]
    async fn test_incomplete_identity_fails_before_any_request() {
        // Nothing listens on the discard port; a request would be a transport error
        let client = ClusterClient::new("http://127.0.0.1:9");
        let err = client
            .apply_manifest("apps/v1", "Deployment", "default", "", String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidResource(_)));
    }
}
