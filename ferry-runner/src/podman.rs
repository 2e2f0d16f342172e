//! Podman backend
//!
//! Implements the build and registry seams on top of the podman CLI:
//! - Checking podman availability
//! - Building single images or multi-platform manifest lists
//! - Inspecting local images for digest and size
//! - Logging in and pushing to registries

use anyhow::{Context, Result};
use async_trait::async_trait;
use ferry_core::domain::build::{BuildSpec, ImageArtifact};
use ferry_core::domain::tag::ImageReference;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::service::builder::{BackendError, BuildBackend, ImageDetails};
use crate::service::publisher::{Registry, RegistryCredentials};

/// Number of output lines kept as diagnostics on failure
const DIAGNOSTIC_LINES: usize = 40;

/// Podman CLI backend
#[derive(Debug, Clone)]
pub struct Podman {
    binary: String,
}

impl Default for Podman {
    fn default() -> Self {
        Self::new("podman")
    }
}

impl Podman {
    /// # Arguments
    /// * `binary` - Executable to invoke (e.g., "podman" or an absolute path)
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that the configured binary runs and reports a version
    pub async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| {
                format!("Failed to execute '{} --version'. Is podman installed?", self.binary)
            })?;

        if !output.status.success() {
            anyhow::bail!("{} is not working correctly", self.binary);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Podman is available: {}", version.trim());

        Ok(())
    }

    /// Runs podman with `args`, failing on a non-zero exit
    async fn run(&self, args: &[String], stdin: Option<&str>) -> Result<Output, BackendError> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|e| {
            BackendError::new(format!("failed to execute {}: {}", self.binary, e))
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| BackendError::new(format!("failed to write to podman stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::new(format!("failed to wait for podman: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("podman {} stderr: {}", subcommand(args), stderr.trim());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(BackendError::new(format!(
                "podman {} exited with code {}",
                subcommand(args),
                exit_code
            ))
            .with_diagnostics(tail(&format!("{}{}", stdout, stderr), DIAGNOSTIC_LINES)));
        }

        Ok(output)
    }

    /// Whether podman reports success for an existence check
    async fn exists(&self, args: &[String]) -> Result<bool, BackendError> {
        let status = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                BackendError::new(format!("failed to execute {}: {}", self.binary, e))
            })?;
        Ok(status.success())
    }
}

#[async_trait]
impl BuildBackend for Podman {
    async fn build(
        &self,
        spec: &BuildSpec,
        local_ref: &str,
        ignore_file: &Path,
    ) -> Result<(), BackendError> {
        if spec.is_multi_platform() {
            // A stale list under the same name would accumulate entries
            let _ = self
                .run(&args(["manifest", "rm", local_ref]), None)
                .await;
        }

        info!(
            "podman build {} for {}",
            local_ref,
            spec.platforms.join(",")
        );
        self.run(&build_args(spec, local_ref, ignore_file), None)
            .await?;
        Ok(())
    }

    async fn inspect(
        &self,
        local_ref: &str,
        spec: &BuildSpec,
    ) -> Result<Option<ImageDetails>, BackendError> {
        if spec.is_multi_platform() {
            if !self.exists(&args(["manifest", "exists", local_ref])).await? {
                return Ok(None);
            }
            let output = self
                .run(&args(["manifest", "inspect", local_ref]), None)
                .await?;
            return parse_manifest_list(&output.stdout).map(Some);
        }

        if !self.exists(&args(["image", "exists", local_ref])).await? {
            return Ok(None);
        }
        let output = self
            .run(
                &args(["image", "inspect", "--format", "json", local_ref]),
                None,
            )
            .await?;
        parse_image_inspect(&output.stdout).map(Some)
    }
}

#[async_trait]
impl Registry for Podman {
    async fn login(
        &self,
        registry: &str,
        credentials: &RegistryCredentials,
    ) -> Result<(), BackendError> {
        self.run(
            &args([
                "login",
                "--username",
                &credentials.username,
                "--password-stdin",
                registry,
            ]),
            Some(&credentials.password),
        )
        .await?;
        info!("Logged in to {} as {}", registry, credentials.username);
        Ok(())
    }

    async fn push(
        &self,
        artifact: &ImageArtifact,
        target: &ImageReference,
    ) -> Result<(), BackendError> {
        let target = target.to_string();
        let command = if artifact.is_manifest_list() {
            args([
                "manifest",
                "push",
                "--all",
                &artifact.local_ref,
                &format!("docker://{}", target),
            ])
        } else {
            args(["push", &artifact.local_ref, &target])
        };

        self.run(&command, None).await?;
        debug!("Pushed {} as {}", artifact.local_ref, target);
        Ok(())
    }
}

/// Arguments of `podman build` for `spec`
fn build_args(spec: &BuildSpec, local_ref: &str, ignore_file: &Path) -> Vec<String> {
    let dockerfile = spec.context_dir.join(&spec.dockerfile);
    let mut command = args([
        "build",
        "--platform",
        &spec.platforms.join(","),
        "--ignorefile",
        &ignore_file.to_string_lossy(),
        "-f",
        &dockerfile.to_string_lossy(),
    ]);

    if spec.is_multi_platform() {
        command.push("--manifest".to_string());
    } else {
        command.push("-t".to_string());
    }
    command.push(local_ref.to_string());
    command.push(spec.context_dir.to_string_lossy().into_owned());
    command
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImage {
    id: String,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    size: u64,
    created: chrono::DateTime<chrono::Utc>,
}

fn parse_image_inspect(stdout: &[u8]) -> Result<ImageDetails, BackendError> {
    let images: Vec<InspectedImage> = serde_json::from_slice(stdout)
        .map_err(|e| BackendError::new(format!("unreadable image inspect output: {}", e)))?;
    let image = images
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::new("image inspect returned no images"))?;

    let digest = match image.digest.filter(|d| !d.is_empty()) {
        Some(digest) => digest,
        None if image.id.starts_with("sha256:") => image.id,
        None => format!("sha256:{}", image.id),
    };

    Ok(ImageDetails {
        digest,
        size_bytes: image.size,
        created_at: image.created,
    })
}

#[derive(Debug, Deserialize)]
struct ManifestList {
    #[serde(default)]
    manifests: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    size: u64,
}

/// Digest of a manifest list is the SHA-256 of its serialized form
fn parse_manifest_list(stdout: &[u8]) -> Result<ImageDetails, BackendError> {
    let list: ManifestList = serde_json::from_slice(stdout)
        .map_err(|e| BackendError::new(format!("unreadable manifest inspect output: {}", e)))?;

    Ok(ImageDetails {
        digest: format!("sha256:{:x}", Sha256::digest(stdout)),
        size_bytes: list.manifests.iter().map(|m| m.size).sum(),
        created_at: chrono::Utc::now(),
    })
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn subcommand(args: &[String]) -> &str {
    args.first().map(String::as_str).unwrap_or("")
}

/// Last `lines` lines of `text`
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_available_uses_configured_binary() {
        let missing = Podman::new("/nonexistent/bin/podman-ferry");
        let err = missing.check_available().await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bin/podman-ferry"));
    }

    #[test]
    fn test_build_args_single_platform() {
        let spec = BuildSpec::new("app", "/src/app");
        let command = build_args(&spec, "app:build-0123456789ab", Path::new("/cache/k.ignore"));

        assert_eq!(
            command,
            vec![
                "build",
                "--platform",
                "linux/amd64",
                "--ignorefile",
                "/cache/k.ignore",
                "-f",
                "/src/app/Dockerfile",
                "-t",
                "app:build-0123456789ab",
                "/src/app",
            ]
        );
    }

    #[test]
    fn test_build_args_multi_platform_uses_manifest() {
        let spec = BuildSpec::new("app", "/src/app")
            .with_platforms(vec!["linux/amd64".to_string(), "linux/arm64".to_string()]);
        let command = build_args(&spec, "app:build-x", Path::new("/cache/k.ignore"));

        assert_eq!(command[2], "linux/amd64,linux/arm64");
        assert!(command.windows(2).any(|w| w == ["--manifest", "app:build-x"]));
    }

    #[test]
    fn test_parse_image_inspect() {
        let stdout = br#"[{
            "Id": "5b0d3a7c",
            "Digest": "sha256:9f86d081884c7d659a2feaa0c55ad015",
            "Size": 52428800,
            "Created": "2026-01-05T10:00:00.123456789Z"
        }]"#;

        let details = parse_image_inspect(stdout).unwrap();
        assert_eq!(details.digest, "sha256:9f86d081884c7d659a2feaa0c55ad015");
        assert_eq!(details.size_bytes, 52428800);
    }

    #[test]
    fn test_parse_image_inspect_falls_back_to_id() {
        let stdout = br#"[{"Id": "5b0d3a7c", "Size": 1, "Created": "2026-01-05T10:00:00Z"}]"#;
        assert_eq!(parse_image_inspect(stdout).unwrap().digest, "sha256:5b0d3a7c");
    }

    #[test]
    fn test_parse_manifest_list() {
        let stdout = br#"{"schemaVersion": 2, "manifests": [{"size": 700}, {"size": 300}]}"#;
        let details = parse_manifest_list(stdout).unwrap();
        assert_eq!(details.size_bytes, 1000);
        assert!(details.digest.starts_with("sha256:"));
        assert_eq!(details.digest.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail("a", 5), "a");
    }
}
