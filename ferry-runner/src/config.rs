//! Release configuration
//!
//! `ferry.yaml` describes what to build, where to push it and how to roll it
//! out. Optional sections fall back to defaults; relative paths resolve
//! against the directory holding the config file. Secrets and runtime
//! endpoints come from the environment instead.

use ferry_core::domain::build::{BuildSpec, DEFAULT_PLATFORM};
use ferry_core::domain::deploy::{DeploymentTarget, ProbeSettings, ResourceBounds};
use ferry_core::domain::tag::is_valid_repository;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::ExcludeMatcher;
use crate::error::{ConfigError, RenderError};
use crate::service::publisher::{PublishSettings, RegistryCredentials};
use crate::service::render::TemplateSet;
use crate::service::tags::{DEFAULT_SHORT_SHA_LEN, TagPlanner};
use crate::service::watcher::WatchSettings;

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "ferry.yaml";

/// Release configuration (`ferry.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub app: AppSection,
    pub image: ImageSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub deploy: DeploySection,
    #[serde(default)]
    pub rollout: RolloutSection,
    #[serde(default)]
    pub publish: PublishSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSection {
    /// Application name, used for the Deployment, Service and pod labels
    pub name: String,
    /// Container port the application listens on
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSection {
    /// Registry host (e.g., "ghcr.io"); empty for the backend default
    #[serde(default)]
    pub registry: String,
    pub repository: String,
    /// Whether to also tag releases as `latest`
    #[serde(default = "default_true")]
    pub latest: bool,
    #[serde(default = "default_short_sha_length")]
    pub short_sha_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    #[serde(default = "default_context")]
    pub context: PathBuf,
    /// Dockerfile path, relative to the context
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            context: default_context(),
            dockerfile: default_dockerfile(),
            exclude: Vec::new(),
            platforms: default_platforms(),
            cache_dir: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySection {
    /// Cluster API URL; `FERRY_CLUSTER_URL` takes precedence
    #[serde(default)]
    pub cluster_url: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub resources: ResourceBounds,
    #[serde(default)]
    pub liveness: ProbeOverrides,
    #[serde(default)]
    pub readiness: ProbeOverrides,
    /// Directory of manifest templates; built-in templates when absent
    #[serde(default)]
    pub templates: Option<PathBuf>,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            cluster_url: None,
            namespace: default_namespace(),
            replicas: default_replicas(),
            resources: ResourceBounds::default(),
            liveness: ProbeOverrides::default(),
            readiness: ProbeOverrides::default(),
            templates: None,
        }
    }
}

/// Probe fields set in the config file; unset fields keep the probe's default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeOverrides {
    pub path: Option<String>,
    pub initial_delay_seconds: Option<u32>,
    pub period_seconds: Option<u32>,
    pub timeout_seconds: Option<u32>,
    pub failure_threshold: Option<u32>,
}

impl ProbeOverrides {
    pub fn apply(&self, base: ProbeSettings) -> ProbeSettings {
        ProbeSettings {
            path: self.path.clone().unwrap_or(base.path),
            initial_delay_seconds: self
                .initial_delay_seconds
                .unwrap_or(base.initial_delay_seconds),
            period_seconds: self.period_seconds.unwrap_or(base.period_seconds),
            timeout_seconds: self.timeout_seconds.unwrap_or(base.timeout_seconds),
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
        }
    }
}

/// Rollout timing, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_stability_window")]
    pub stability_window_secs: u64,
}

impl Default for RolloutSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
            stability_window_secs: default_stability_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_short_sha_length() -> usize {
    DEFAULT_SHORT_SHA_LEN
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("Dockerfile")
}

fn default_platforms() -> Vec<String> {
    vec![DEFAULT_PLATFORM.to_string()]
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".ferry/cache")
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_replicas() -> u32 {
    1
}

fn default_poll_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    300
}

fn default_stability_window() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl ReleaseConfig {
    /// Loads and validates a config file
    ///
    /// Relative `build.context`, `build.cache_dir` and `deploy.templates`
    /// paths are resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let text = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.build.context = resolve(base, &config.build.context);
        config.build.cache_dir = resolve(base, &config.build.cache_dir);
        config.deploy.templates = config.deploy.templates.map(|t| resolve(base, &t));

        Ok(config)
    }

    /// Parses and validates config text without resolving paths
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(invalid("app.name cannot be empty"));
        }

        if !is_dns_1035_label(&self.app.name) {
            return Err(invalid(
                "app.name must be a DNS label starting with a letter (lowercase alphanumerics and '-')",
            ));
        }

        if self.app.port == 0 {
            return Err(invalid("app.port must be greater than 0"));
        }

        if !is_valid_repository(&self.image.repository) {
            return Err(invalid(format!(
                "image.repository '{}' is not a valid repository name",
                self.image.repository
            )));
        }

        if self.image.short_sha_length == 0 {
            return Err(invalid("image.short_sha_length must be greater than 0"));
        }

        if let Err(e) = ExcludeMatcher::new(&self.build.exclude) {
            return Err(invalid(format!("build.exclude has an invalid pattern: {e}")));
        }

        if self.build.platforms.is_empty() {
            return Err(invalid("build.platforms cannot be empty"));
        }

        if !is_dns_label(&self.deploy.namespace) {
            return Err(invalid(format!(
                "deploy.namespace '{}' must be a DNS label",
                self.deploy.namespace
            )));
        }

        if self.deploy.replicas == 0 {
            return Err(invalid("deploy.replicas must be greater than 0"));
        }

        if let Some(url) = &self.deploy.cluster_url {
            if !is_http_url(url) {
                return Err(invalid("deploy.cluster_url must start with http:// or https://"));
            }
        }

        for (probe, overrides) in [
            ("liveness", &self.deploy.liveness),
            ("readiness", &self.deploy.readiness),
        ] {
            if overrides.path.as_deref().is_some_and(|p| !p.starts_with('/')) {
                return Err(invalid(format!("deploy.{probe}.path must start with '/'")));
            }
            if overrides.period_seconds == Some(0) || overrides.failure_threshold == Some(0) {
                return Err(invalid(format!(
                    "deploy.{probe} period and failure threshold must be greater than 0"
                )));
            }
        }

        if self.rollout.poll_interval_secs == 0 {
            return Err(invalid("rollout.poll_interval_secs must be greater than 0"));
        }

        if self.rollout.timeout_secs < self.rollout.poll_interval_secs {
            return Err(invalid(
                "rollout.timeout_secs must be at least rollout.poll_interval_secs",
            ));
        }

        if self.rollout.stability_window_secs >= self.rollout.timeout_secs {
            return Err(invalid(
                "rollout.stability_window_secs must be less than rollout.timeout_secs",
            ));
        }

        if self.publish.max_attempts == 0 {
            return Err(invalid("publish.max_attempts must be greater than 0"));
        }

        Ok(())
    }

    pub fn build_spec(&self) -> BuildSpec {
        BuildSpec::new(&self.image.repository, &self.build.context)
            .with_dockerfile(&self.build.dockerfile)
            .with_excludes(self.build.exclude.clone())
            .with_platforms(self.build.platforms.clone())
    }

    /// Deployment target; `cluster_url` overrides the file's value
    pub fn deployment_target(&self, cluster_url: Option<&str>) -> Result<DeploymentTarget, ConfigError> {
        let url = cluster_url
            .or(self.deploy.cluster_url.as_deref())
            .ok_or_else(|| {
                invalid("no cluster URL: set deploy.cluster_url or FERRY_CLUSTER_URL")
            })?;

        if !is_http_url(url) {
            return Err(invalid(format!("cluster URL '{}' must be http(s)", url)));
        }

        Ok(self.target_at(url))
    }

    /// Deployment target for rendering only; the cluster URL may be empty
    pub fn render_target(&self) -> DeploymentTarget {
        self.target_at(self.deploy.cluster_url.as_deref().unwrap_or_default())
    }

    fn target_at(&self, cluster_url: &str) -> DeploymentTarget {
        let mut target = DeploymentTarget::new(
            cluster_url,
            &self.deploy.namespace,
            &self.app.name,
            self.app.port,
            self.deploy.replicas,
        );
        target.resources = self.deploy.resources.clone();
        target.liveness = self.deploy.liveness.apply(ProbeSettings::liveness_default());
        target.readiness = self.deploy.readiness.apply(ProbeSettings::readiness_default());
        target
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_secs(self.rollout.poll_interval_secs),
            deadline: Duration::from_secs(self.rollout.timeout_secs),
            stability_window: Duration::from_secs(self.rollout.stability_window_secs),
        }
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            registry: self.image.registry.clone(),
            max_attempts: self.publish.max_attempts,
            initial_backoff: Duration::from_millis(self.publish.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.publish.max_backoff_ms),
        }
    }

    pub fn tag_planner(&self) -> TagPlanner {
        TagPlanner::new(self.image.short_sha_length)
    }

    /// Templates from `deploy.templates`, or the built-in set
    pub fn template_set(&self) -> Result<TemplateSet, RenderError> {
        match &self.deploy.templates {
            Some(dir) => TemplateSet::from_dir(dir),
            None => Ok(TemplateSet::builtin()),
        }
    }

    /// Sample configuration written by `ferry init`
    pub fn sample(name: &str) -> String {
        format!(
            r#"app:
  name: {name}
  port: 8080

image:
  registry: ghcr.io
  repository: example/{name}
  latest: true

build:
  context: .
  dockerfile: Dockerfile
  exclude:
    - .git
    - target
    - node_modules
  platforms:
    - linux/amd64

deploy:
  namespace: default
  replicas: 2
  resources:
    requests:
      cpu: 100m
      memory: 128Mi
    limits:
      cpu: 500m
      memory: 512Mi
  readiness:
    path: /health
  liveness:
    path: /health

rollout:
  poll_interval_secs: 5
  timeout_secs: 300
  stability_window_secs: 10
"#
        )
    }
}

/// Secrets and endpoints read from the environment
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub registry_credentials: Option<RegistryCredentials>,
    pub cluster_token: Option<String>,
    pub cluster_url: Option<String>,
}

impl Environment {
    /// Reads the environment
    ///
    /// Environment variables:
    /// - FERRY_REGISTRY_USERNAME / FERRY_REGISTRY_PASSWORD (optional, both or neither)
    /// - FERRY_CLUSTER_TOKEN (optional)
    /// - FERRY_CLUSTER_URL (optional, overrides deploy.cluster_url)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let registry_credentials = match (
            get("FERRY_REGISTRY_USERNAME"),
            get("FERRY_REGISTRY_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(RegistryCredentials { username, password }),
            (None, None) => None,
            _ => {
                return Err(invalid(
                    "FERRY_REGISTRY_USERNAME and FERRY_REGISTRY_PASSWORD must be set together",
                ));
            }
        };

        Ok(Self {
            registry_credentials,
            cluster_token: get("FERRY_CLUSTER_TOKEN"),
            cluster_url: get("FERRY_CLUSTER_URL"),
        })
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

/// Service and Deployment names must also start with a letter
fn is_dns_1035_label(value: &str) -> bool {
    is_dns_label(value) && value.starts_with(|c: char| c.is_ascii_lowercase())
}
