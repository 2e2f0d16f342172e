//! API discovery
//!
//! Resolves a manifest's `apiVersion`/`kind` to the REST resource name the
//! cluster serves it under. Discovery documents are fetched once per group
//! version and cached on the client.

use crate::ClusterClient;
use crate::error::{ClientError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};

impl ClusterClient {
    /// Look up the resource a kind is served as in `api_version`
    pub async fn resolve_resource(&self, api_version: &str, kind: &str) -> Result<APIResource> {
        {
            let cache = self.discovery.read().await;
            if let Some(list) = cache.get(api_version) {
                return served_resource(list, api_version, kind);
            }
        }

        let list = self.get_resource_list(api_version).await?;
        let resource = served_resource(&list, api_version, kind);
        self.discovery
            .write()
            .await
            .insert(api_version.to_string(), list);
        resource
    }

    /// Fetch the discovery document of a group version
    pub async fn get_resource_list(&self, api_version: &str) -> Result<APIResourceList> {
        let url = format!("{}{}", self.base_url, group_version_path(api_version));
        tracing::debug!("Discovering resources of {}", api_version);

        let response = self.authorize(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }
}

/// REST prefix of a group version
///
/// Core resources (`apiVersion: v1`) live under `/api/v1`, grouped resources
/// under `/apis/{group}/{version}`.
pub fn group_version_path(api_version: &str) -> String {
    if api_version.contains('/') {
        format!("/apis/{}", api_version)
    } else {
        format!("/api/{}", api_version)
    }
}

/// Find the top-level resource serving `kind`, skipping subresources
pub fn find_resource<'a>(list: &'a APIResourceList, kind: &str) -> Option<&'a APIResource> {
    list.resources
        .iter()
        .find(|r| r.kind == kind && !r.name.contains('/'))
}

fn served_resource(list: &APIResourceList, api_version: &str, kind: &str) -> Result<APIResource> {
    find_resource(list, kind).cloned().ok_or_else(|| {
        ClientError::InvalidResource(format!("{} is not served by {}", kind, api_version))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apps_v1() -> APIResourceList {
        serde_json::from_value(json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": "apps/v1",
            "resources": [
                {
                    "name": "deployments",
                    "singularName": "deployment",
                    "namespaced": true,
                    "kind": "Deployment",
                    "verbs": ["create", "get", "list", "patch", "update", "watch"]
                },
                {
                    "name": "deployments/status",
                    "singularName": "",
                    "namespaced": true,
                    "kind": "Deployment",
                    "verbs": ["get", "patch", "update"]
                },
                {
                    "name": "deployments/scale",
                    "singularName": "",
                    "namespaced": true,
                    "group": "autoscaling",
                    "version": "v1",
                    "kind": "Scale",
                    "verbs": ["get", "patch", "update"]
                },
                {
                    "name": "replicasets",
                    "singularName": "replicaset",
                    "namespaced": true,
                    "kind": "ReplicaSet",
                    "verbs": ["get", "list", "patch"]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_group_version_path() {
        assert_eq!(group_version_path("apps/v1"), "/apis/apps/v1");
        assert_eq!(group_version_path("v1"), "/api/v1");
        assert_eq!(
            group_version_path("networking.k8s.io/v1"),
            "/apis/networking.k8s.io/v1"
        );
    }

    #[test]
    fn test_find_resource_skips_subresources() {
        let list = apps_v1();
        let resource = find_resource(&list, "Deployment").unwrap();
        assert_eq!(resource.name, "deployments");
        assert!(resource.namespaced);
        assert_eq!(find_resource(&list, "ReplicaSet").unwrap().name, "replicasets");
        assert!(find_resource(&list, "Scale").is_none());
    }

    #[test]
    fn test_unserved_kind_is_invalid() {
        let err = served_resource(&apps_v1(), "apps/v1", "CronJob").unwrap_err();
        assert!(matches!(err, ClientError::InvalidResource(ref m) if m.contains("CronJob")));
    }
}
