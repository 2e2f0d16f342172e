//! Manifest renderer
//!
//! Substitutes `{{ key }}` placeholders in Deployment/Service templates
//! with values from the deployment target and the published image
//! reference, then checks that every required field is present.

use ferry_core::domain::deploy::DeploymentTarget;
use ferry_core::domain::tag::ImageReference;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::RenderError;

const BUILTIN_DEPLOYMENT: &str = include_str!("../../templates/deployment.yaml");
const BUILTIN_SERVICE: &str = include_str!("../../templates/service.yaml");

/// A named manifest template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    pub name: String,
    pub source: String,
}

/// Ordered set of manifest templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    templates: Vec<ManifestTemplate>,
}

impl TemplateSet {
    pub fn new(templates: Vec<ManifestTemplate>) -> Self {
        Self { templates }
    }

    /// Built-in Deployment (with resources and probes) and ClusterIP Service
    pub fn builtin() -> Self {
        Self::new(vec![
            ManifestTemplate {
                name: "deployment.yaml".to_string(),
                source: BUILTIN_DEPLOYMENT.to_string(),
            },
            ManifestTemplate {
                name: "service.yaml".to_string(),
                source: BUILTIN_SERVICE.to_string(),
            },
        ])
    }

    /// Loads every `*.yaml` / `*.yml` file of `dir`, in file-name order
    pub fn from_dir(dir: &Path) -> Result<Self, RenderError> {
        let io_err = |source| RenderError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if path.is_file() && is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut templates = Vec::with_capacity(paths.len());
        for path in paths {
            let source = std::fs::read_to_string(&path).map_err(|source| RenderError::Io {
                path: path.clone(),
                source,
            })?;
            templates.push(ManifestTemplate {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                source,
            });
        }

        if templates.is_empty() {
            return Err(RenderError::InvalidTemplate {
                template: dir.display().to_string(),
                message: "no *.yaml templates found".to_string(),
            });
        }

        Ok(Self::new(templates))
    }

    pub fn templates(&self) -> &[ManifestTemplate] {
        &self.templates
    }
}

/// A fully resolved manifest document
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedManifest {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub document: Value,
    /// Serialized document, as sent to the cluster
    pub text: String,
}

impl RenderedManifest {
    /// Image of the first container of a Deployment
    pub fn container_image(&self) -> Option<&str> {
        self.document["spec"]["template"]["spec"]["containers"][0]["image"].as_str()
    }
}

/// Renders templates for a deployment target
#[derive(Debug, Clone)]
pub struct ManifestRenderer {
    templates: TemplateSet,
}

impl ManifestRenderer {
    pub fn new(templates: TemplateSet) -> Self {
        Self { templates }
    }

    /// Renders every template with `image` as the container image
    pub fn render(
        &self,
        target: &DeploymentTarget,
        image: &ImageReference,
    ) -> Result<Vec<RenderedManifest>, RenderError> {
        let values = template_values(target, image);
        let mut manifests = Vec::new();

        for template in self.templates.templates() {
            let text = substitute(&template.name, &template.source, &values)?;
            for document in parse_documents(&template.name, &text)? {
                let manifest = finish_document(&template.name, document, target)?;
                debug!(
                    "Rendered {} {}/{} from {}",
                    manifest.kind, manifest.namespace, manifest.name, template.name
                );
                manifests.push(manifest);
            }
        }

        Ok(manifests)
    }
}

/// Placeholder values for a target and image
fn template_values(target: &DeploymentTarget, image: &ImageReference) -> HashMap<String, String> {
    let mut values: HashMap<String, String> = [
        ("name", target.name.clone()),
        ("namespace", target.namespace.clone()),
        ("image", image.to_string()),
        ("replicas", target.replicas.to_string()),
        ("port", target.port.to_string()),
        ("cpu_request", target.resources.requests.cpu.clone()),
        ("memory_request", target.resources.requests.memory.clone()),
        ("cpu_limit", target.resources.limits.cpu.clone()),
        ("memory_limit", target.resources.limits.memory.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    for (prefix, probe) in [("liveness", &target.liveness), ("readiness", &target.readiness)] {
        values.insert(format!("{prefix}_path"), probe.path.clone());
        values.insert(
            format!("{prefix}_initial_delay"),
            probe.initial_delay_seconds.to_string(),
        );
        values.insert(format!("{prefix}_period"), probe.period_seconds.to_string());
        values.insert(format!("{prefix}_timeout"), probe.timeout_seconds.to_string());
        values.insert(
            format!("{prefix}_failure_threshold"),
            probe.failure_threshold.to_string(),
        );
    }

    values
}

/// Replaces every `{{ key }}` with its value
///
/// Unknown keys fail with `UnresolvedPlaceholder`; an unterminated `{{`
/// fails with `InvalidTemplate`.
pub fn substitute(
    template: &str,
    source: &str,
    values: &HashMap<String, String>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| RenderError::InvalidTemplate {
            template: template.to_string(),
            message: "unterminated '{{'".to_string(),
        })?;

        let key = after[..end].trim();
        let value = values
            .get(key)
            .ok_or_else(|| RenderError::UnresolvedPlaceholder {
                template: template.to_string(),
                field: key.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Parses a (possibly multi-document) YAML stream, skipping empty documents
pub fn parse_documents(template: &str, text: &str) -> Result<Vec<Value>, RenderError> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).map_err(|e| RenderError::InvalidTemplate {
            template: template.to_string(),
            message: e.to_string(),
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Validates required fields and builds the rendered manifest
fn finish_document(
    template: &str,
    mut document: Value,
    target: &DeploymentTarget,
) -> Result<RenderedManifest, RenderError> {
    let unresolved = |field: &str| RenderError::UnresolvedPlaceholder {
        template: template.to_string(),
        field: field.to_string(),
    };

    let api_version = non_empty_str(&document["apiVersion"])
        .ok_or_else(|| unresolved("apiVersion"))?
        .to_string();
    let kind = non_empty_str(&document["kind"])
        .ok_or_else(|| unresolved("kind"))?
        .to_string();
    let name = non_empty_str(&document["metadata"]["name"])
        .ok_or_else(|| unresolved("metadata.name"))?
        .to_string();

    let namespace = match non_empty_str(&document["metadata"]["namespace"]) {
        Some(ns) => ns.to_string(),
        None => {
            if let Some(metadata) = document
                .get_mut("metadata")
                .and_then(Value::as_mapping_mut)
            {
                metadata.insert(
                    Value::String("namespace".to_string()),
                    Value::String(target.namespace.clone()),
                );
            }
            target.namespace.clone()
        }
    };

    match kind.as_str() {
        "Deployment" => {
            if document["spec"]["replicas"].as_u64().is_none() {
                return Err(unresolved("spec.replicas"));
            }
            let containers = document["spec"]["template"]["spec"]["containers"]
                .as_sequence()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| unresolved("spec.template.spec.containers"))?;
            for container in containers {
                if non_empty_str(&container["image"]).is_none() {
                    return Err(unresolved("containers[].image"));
                }
            }
            if containers[0]["ports"][0]["containerPort"].as_u64().is_none() {
                return Err(unresolved("containers[0].ports[0].containerPort"));
            }
        }
        "Service" => {
            let has_port = document["spec"]["ports"]
                .as_sequence()
                .is_some_and(|ports| !ports.is_empty() && ports.iter().all(|p| p["port"].as_u64().is_some()));
            if !has_port {
                return Err(unresolved("spec.ports[].port"));
            }
        }
        _ => {}
    }

    let text = serde_yaml::to_string(&document).map_err(|e| RenderError::InvalidTemplate {
        template: template.to_string(),
        message: e.to_string(),
    })?;

    Ok(RenderedManifest {
        api_version,
        kind,
        name,
        namespace,
        document,
        text,
    })
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}
