//! Commit resolution
//!
//! The commit tag comes from, in order: the `--commit` flag, `FERRY_COMMIT`,
//! `GITHUB_SHA`, then `git rev-parse HEAD` in the build context.

use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Resolves the commit identifier, `None` when no source is available
pub async fn resolve_commit(explicit: Option<String>, context_dir: &Path) -> Option<String> {
    resolve_with(explicit, |key| std::env::var(key).ok(), context_dir).await
}

async fn resolve_with(
    explicit: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
    context_dir: &Path,
) -> Option<String> {
    let from_env = || {
        ["FERRY_COMMIT", "GITHUB_SHA"]
            .into_iter()
            .find_map(|key| lookup(key).filter(|v| !v.trim().is_empty()))
    };

    if let Some(commit) = explicit.filter(|c| !c.trim().is_empty()).or_else(from_env) {
        return Some(commit);
    }

    git_head(context_dir).await
}

async fn git_head(context_dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("rev-parse")
        .arg("HEAD")
        .current_dir(context_dir)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        debug!(
            "git rev-parse HEAD failed in {}: {}",
            context_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!head.is_empty()).then_some(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_commit_wins() {
        let commit = resolve_with(
            Some("abc123".to_string()),
            |_| Some("fff".to_string()),
            Path::new("."),
        )
        .await;
        assert_eq!(commit.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_environment_fallback_order() {
        let commit = resolve_with(
            None,
            |key| match key {
                "FERRY_COMMIT" => Some("  ".to_string()),
                "GITHUB_SHA" => Some("def456".to_string()),
                _ => None,
            },
            Path::new("."),
        )
        .await;
        assert_eq!(commit.as_deref(), Some("def456"));
    }

    #[tokio::test]
    async fn test_no_source_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        let commit = resolve_with(None, |_| None, dir.path()).await;
        assert_eq!(commit, None);
    }
}
