//! Cluster repository
//!
//! Implements `ClusterApi` over the HTTP cluster client:
//! - Server-side apply of rendered manifests
//! - Deployment health derived from deployment status and the pods of its
//!   current revision

use anyhow::Context;
use async_trait::async_trait;
use ferry_client::{ClientError, ClusterClient};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::time::Duration;
use tracing::debug;

use crate::service::render::RenderedManifest;
use crate::service::watcher::{ClusterApi, DeploymentHealth};

/// Container waiting reasons that never resolve without a change
const BLOCKING_WAIT_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
];

/// Annotation carrying the rollout revision on deployments and replica sets
const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Label the deployment controller stamps on a revision's replica set and pods
const TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Timeout of a single cluster API request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of ClusterApi
pub struct HttpClusterApi {
    client: ClusterClient,
}

impl HttpClusterApi {
    pub fn new(client: ClusterClient) -> Self {
        Self { client }
    }

    /// Connects to `cluster_url`, authenticating with `token` when given
    pub fn connect(cluster_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build cluster HTTP client")?;

        let client = ClusterClient::with_client(cluster_url, http);
        let client = match token {
            Some(token) => client.with_token(token),
            None => client,
        };
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn apply(&self, manifest: &RenderedManifest) -> Result<(), ClientError> {
        self.client
            .apply_manifest(
                &manifest.api_version,
                &manifest.kind,
                &manifest.namespace,
                &manifest.name,
                manifest.text.clone(),
            )
            .await
    }

    async fn deployment_health(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentHealth, ClientError> {
        let deployment = self.client.get_deployment(namespace, name).await?;

        // An empty selector would list every pod in the namespace
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|spec| label_selector(&spec.selector));
        let (replica_sets, pods) = match selector {
            Some(selector) => (
                self.client
                    .list_replica_sets(namespace, &selector)
                    .await?
                    .items,
                self.client.list_pods(namespace, &selector).await?.items,
            ),
            None => (Vec::new(), Vec::new()),
        };

        let health = health_of(&deployment, &replica_sets, &pods);
        debug!(
            "Deployment {}/{} health: {}/{} ready, {} updated, {} total",
            namespace, name, health.ready, health.desired, health.updated, health.total
        );
        Ok(health)
    }
}

/// Renders a label selector in the API's query syntax
///
/// Returns None for a selector without requirements.
pub fn label_selector(selector: &LabelSelector) -> Option<String> {
    let mut terms = Vec::new();

    for (key, value) in selector.match_labels.iter().flatten() {
        terms.push(format!("{}={}", key, value));
    }

    for requirement in selector.match_expressions.iter().flatten() {
        let values = requirement.values.as_deref().unwrap_or_default().join(",");
        let term = match requirement.operator.as_str() {
            "In" => format!("{} in ({})", requirement.key, values),
            "NotIn" => format!("{} notin ({})", requirement.key, values),
            "Exists" => requirement.key.clone(),
            "DoesNotExist" => format!("!{}", requirement.key),
            _ => continue,
        };
        terms.push(term);
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(","))
    }
}

/// Converts API objects into a health snapshot
///
/// Until the controller has observed the latest generation, its replica
/// counts and conditions describe the previous revision: counts are
/// reported as zero and no blocker is derived from them.
fn health_of(
    deployment: &Deployment,
    replica_sets: &[ReplicaSet],
    pods: &[Pod],
) -> DeploymentHealth {
    let desired = match deployment.spec.as_ref().and_then(|s| s.replicas) {
        Some(replicas) => count(Some(replicas)),
        None => 1,
    };
    let status = deployment.status.clone().unwrap_or_default();

    let observed = match (deployment.metadata.generation, status.observed_generation) {
        (Some(generation), Some(seen)) => seen >= generation,
        (Some(_), None) => false,
        (None, _) => true,
    };

    if !observed {
        return DeploymentHealth {
            desired,
            ready: 0,
            updated: 0,
            total: count(status.replicas),
            blocker: None,
        };
    }

    DeploymentHealth {
        desired,
        ready: count(status.ready_replicas),
        updated: count(status.updated_replicas),
        total: count(status.replicas),
        blocker: detect_blocker(deployment, replica_sets, pods),
    }
}

fn count(value: Option<i32>) -> u32 {
    value.and_then(|n| u32::try_from(n).ok()).unwrap_or(0)
}

/// Finds a permanent error preventing the rollout from progressing
///
/// Looks at the deployment's `Progressing` condition, then at scheduling
/// and container waiting states of pods belonging to the current revision.
/// Pods left over from older revisions are ignored.
pub fn detect_blocker(
    deployment: &Deployment,
    replica_sets: &[ReplicaSet],
    pods: &[Pod],
) -> Option<String> {
    let conditions = deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    for condition in conditions {
        if condition.type_ == "Progressing"
            && condition.status == "False"
            && condition.reason.as_deref() == Some("ProgressDeadlineExceeded")
        {
            return Some(describe(
                "ProgressDeadlineExceeded",
                condition.message.as_deref(),
            ));
        }
    }

    let hash = current_template_hash(deployment, replica_sets)?;
    let current = pods
        .iter()
        .filter(|pod| label(&pod.metadata, TEMPLATE_HASH_LABEL) == Some(hash));

    for pod in current {
        if let Some(blocker) = pod_blocker(pod) {
            return Some(blocker);
        }
    }

    None
}

/// `pod-template-hash` of the replica set running the deployment's revision
///
/// Only replica sets controlled by the deployment count. Prefers the one
/// whose revision matches the deployment's, else the highest revision.
pub fn current_template_hash<'a>(
    deployment: &Deployment,
    replica_sets: &'a [ReplicaSet],
) -> Option<&'a str> {
    let owned: Vec<&ReplicaSet> = replica_sets
        .iter()
        .filter(|rs| is_owned_by(&rs.metadata, &deployment.metadata))
        .collect();

    let wanted = annotation(&deployment.metadata, REVISION_ANNOTATION);
    let current: &ReplicaSet = owned
        .iter()
        .copied()
        .find(|rs| wanted.is_some() && annotation(&rs.metadata, REVISION_ANNOTATION) == wanted)
        .or_else(|| owned.iter().copied().max_by_key(|rs| revision(&rs.metadata)))?;

    label(&current.metadata, TEMPLATE_HASH_LABEL)
}

fn is_owned_by(child: &ObjectMeta, owner: &ObjectMeta) -> bool {
    child.owner_references.iter().flatten().any(|reference| {
        reference.kind == "Deployment"
            && Some(reference.name.as_str()) == owner.name.as_deref()
            && owner.uid.as_deref().is_none_or(|uid| uid == reference.uid)
    })
}

fn revision(meta: &ObjectMeta) -> u64 {
    annotation(meta, REVISION_ANNOTATION)
        .and_then(|r| r.parse().ok())
        .unwrap_or(0)
}

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref()?.get(key).map(String::as_str)
}

fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref()?.get(key).map(String::as_str)
}

fn pod_blocker(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;

    for condition in status.conditions.iter().flatten() {
        if condition.type_ == "PodScheduled"
            && condition.status == "False"
            && condition.reason.as_deref() == Some("Unschedulable")
        {
            return Some(describe("Unschedulable", condition.message.as_deref()));
        }
    }

    for container in status.container_statuses.iter().flatten() {
        let Some(waiting) = container.state.as_ref().and_then(|s| s.waiting.as_ref()) else {
            continue;
        };
        match waiting.reason.as_deref() {
            Some(reason) if BLOCKING_WAIT_REASONS.contains(&reason) => {
                return Some(format!(
                    "{} (pod {}, container {})",
                    describe(reason, waiting.message.as_deref()),
                    pod.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    container.name
                ));
            }
            _ => {}
        }
    }

    None
}

fn describe(reason: &str, message: Option<&str>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!("{}: {}", reason, message),
        _ => reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn deployment(value: Value) -> Deployment {
        serde_json::from_value(value).unwrap()
    }

    /// Deployment `app` at `generation`, observed up to `observed`
    fn rolled_deployment(generation: i64, observed: i64, conditions: Value) -> Deployment {
        deployment(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "app",
                "namespace": "default",
                "uid": "dep-uid",
                "generation": generation,
                "annotations": { "deployment.kubernetes.io/revision": generation.to_string() }
            },
            "spec": {
                "replicas": 3,
                "selector": { "matchLabels": { "app": "app" } },
                "template": { "metadata": { "labels": { "app": "app" } } }
            },
            "status": {
                "observedGeneration": observed,
                "replicas": 3,
                "readyReplicas": 3,
                "updatedReplicas": 3,
                "conditions": conditions
            }
        }))
    }

    fn healthy_deployment() -> Deployment {
        rolled_deployment(
            2,
            2,
            json!([{ "type": "Progressing", "status": "True", "reason": "NewReplicaSetAvailable" }]),
        )
    }

    fn replica_set(hash: &str, revision: u64, owner_uid: &str) -> ReplicaSet {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {
                "name": format!("app-{hash}"),
                "labels": { "app": "app", "pod-template-hash": hash },
                "annotations": { "deployment.kubernetes.io/revision": revision.to_string() },
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": "app",
                    "uid": owner_uid,
                    "controller": true
                }]
            },
            "spec": { "selector": { "matchLabels": { "pod-template-hash": hash } } }
        }))
        .unwrap()
    }

    fn pod(name: &str, hash: &str, status: Value) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "labels": { "app": "app", "pod-template-hash": hash }
            },
            "status": status
        }))
        .unwrap()
    }

    fn waiting(reason: &str, message: &str) -> Value {
        json!({
            "phase": "Pending",
            "containerStatuses": [{
                "name": "app",
                "image": "registry/app:abc123",
                "imageID": "",
                "ready": false,
                "restartCount": 0,
                "state": { "waiting": { "reason": reason, "message": message } }
            }]
        })
    }

    #[test]
    fn test_connect_with_token() {
        assert!(HttpClusterApi::connect("https://cluster.local:6443", Some("t0k3n")).is_ok());
    }

    #[test]
    fn test_health_of_observed_deployment() {
        let health = health_of(&healthy_deployment(), &[], &[]);
        assert_eq!(
            health,
            DeploymentHealth {
                desired: 3,
                ready: 3,
                updated: 3,
                total: 3,
                blocker: None,
            }
        );
    }

    #[test]
    fn test_health_ignores_stale_generation() {
        let mut stale = healthy_deployment();
        stale.metadata.generation = Some(3);

        let health = health_of(&stale, &[], &[]);
        assert_eq!(health.ready, 0);
        assert_eq!(health.updated, 0);
        assert_eq!(health.total, 3);
    }

    #[test]
    fn test_stale_progress_deadline_is_not_a_blocker() {
        // The previous rollout timed out; the new generation is not yet observed
        let stale = rolled_deployment(
            3,
            2,
            json!([{
                "type": "Progressing",
                "status": "False",
                "reason": "ProgressDeadlineExceeded",
                "message": "ReplicaSet \"app-old\" has timed out progressing."
            }]),
        );

        let health = health_of(&stale, &[], &[]);
        assert_eq!(health.blocker, None);
        assert_eq!(health.ready, 0);

        // Once observed, the condition describes the current revision
        let observed = rolled_deployment(
            3,
            3,
            json!([{ "type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded" }]),
        );
        assert_eq!(
            health_of(&observed, &[], &[]).blocker.as_deref(),
            Some("ProgressDeadlineExceeded")
        );
    }

    #[test]
    fn test_stale_generation_ignores_pod_errors() {
        let stale = rolled_deployment(3, 2, json!([]));
        let replica_sets = [replica_set("newhash", 3, "dep-uid")];
        let pods = [pod("app-newhash-a", "newhash", waiting("ErrImagePull", "not found"))];

        assert_eq!(health_of(&stale, &replica_sets, &pods).blocker, None);
    }

    #[test]
    fn test_old_revision_pods_are_ignored() {
        let deployment = rolled_deployment(4, 4, json!([]));
        let replica_sets = [
            replica_set("oldhash", 3, "dep-uid"),
            replica_set("newhash", 4, "dep-uid"),
        ];
        let leftover = pod(
            "app-oldhash-x",
            "oldhash",
            waiting("ImagePullBackOff", "Back-off pulling image \"registry/app:old\""),
        );
        let starting = pod(
            "app-newhash-y",
            "newhash",
            waiting("ContainerCreating", ""),
        );

        let health = health_of(&deployment, &replica_sets, &[leftover.clone(), starting]);
        assert_eq!(health.blocker, None);

        let failing = pod(
            "app-newhash-z",
            "newhash",
            waiting("ImagePullBackOff", "Back-off pulling image \"registry/app:new\""),
        );
        let blocker = detect_blocker(&deployment, &replica_sets, &[leftover, failing]).unwrap();
        assert!(blocker.starts_with("ImagePullBackOff: Back-off pulling image"));
        assert!(blocker.contains("pod app-newhash-z"));
    }

    #[test]
    fn test_current_hash_prefers_matching_revision() {
        let deployment = rolled_deployment(4, 4, json!([]));
        let replica_sets = [
            replica_set("newhash", 4, "dep-uid"),
            replica_set("otherhash", 9, "other-uid"),
            replica_set("oldhash", 3, "dep-uid"),
        ];
        assert_eq!(
            current_template_hash(&deployment, &replica_sets),
            Some("newhash")
        );

        // Without a revision annotation the highest owned revision wins
        let mut unannotated = deployment.clone();
        unannotated.metadata.annotations = None;
        assert_eq!(
            current_template_hash(&unannotated, &replica_sets),
            Some("newhash")
        );

        assert_eq!(current_template_hash(&deployment, &[]), None);
    }

    #[test]
    fn test_detects_image_pull_backoff() {
        let replica_sets = [replica_set("7d9f", 2, "dep-uid")];
        let pods = [pod(
            "app-7d9f-abcde",
            "7d9f",
            waiting("ImagePullBackOff", "Back-off pulling image \"registry/app:abc123\""),
        )];

        let blocker = detect_blocker(&healthy_deployment(), &replica_sets, &pods).unwrap();
        assert!(blocker.starts_with("ImagePullBackOff: Back-off pulling image"));
        assert!(blocker.contains("pod app-7d9f-abcde"));
        assert!(blocker.contains("container app"));
    }

    #[test]
    fn test_container_creating_is_not_a_blocker() {
        let replica_sets = [replica_set("7d9f", 2, "dep-uid")];
        let pods = [pod("app-1", "7d9f", waiting("ContainerCreating", ""))];
        assert_eq!(
            detect_blocker(&healthy_deployment(), &replica_sets, &pods),
            None
        );
    }

    #[test]
    fn test_detects_unschedulable_pod() {
        let replica_sets = [replica_set("7d9f", 2, "dep-uid")];
        let pods = [pod(
            "app-1",
            "7d9f",
            json!({
                "conditions": [{
                    "type": "PodScheduled",
                    "status": "False",
                    "reason": "Unschedulable",
                    "message": "0/3 nodes are available: insufficient cpu"
                }]
            }),
        )];
        assert_eq!(
            detect_blocker(&healthy_deployment(), &replica_sets, &pods).as_deref(),
            Some("Unschedulable: 0/3 nodes are available: insufficient cpu")
        );
    }

    #[test]
    fn test_detects_progress_deadline() {
        let stuck = deployment(json!({
            "metadata": { "name": "app" },
            "status": {
                "conditions": [{
                    "type": "Progressing",
                    "status": "False",
                    "reason": "ProgressDeadlineExceeded"
                }]
            }
        }));
        assert_eq!(
            detect_blocker(&stuck, &[], &[]).as_deref(),
            Some("ProgressDeadlineExceeded")
        );
    }

    #[test]
    fn test_label_selector_from_match_labels() {
        let selector: LabelSelector = serde_json::from_value(json!({
            "matchLabels": { "tier": "web", "app.kubernetes.io/name": "shop" }
        }))
        .unwrap();
        assert_eq!(
            label_selector(&selector).as_deref(),
            Some("app.kubernetes.io/name=shop,tier=web")
        );
    }

    #[test]
    fn test_label_selector_with_expressions() {
        let selector: LabelSelector = serde_json::from_value(json!({
            "matchLabels": { "app": "shop" },
            "matchExpressions": [
                { "key": "track", "operator": "In", "values": ["stable", "canary"] },
                { "key": "legacy", "operator": "DoesNotExist" }
            ]
        }))
        .unwrap();
        assert_eq!(
            label_selector(&selector).as_deref(),
            Some("app=shop,track in (stable,canary),!legacy")
        );

        assert_eq!(label_selector(&LabelSelector::default()), None);
    }
}
