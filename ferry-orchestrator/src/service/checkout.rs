//! Source checkout
//!
//! Moves the build context to the pushed commit before a run builds it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Prepares the source tree for a commit
#[async_trait]
pub trait SourceCheckout: Send + Sync {
    async fn checkout(&self, commit: &str) -> Result<()>;
}

/// Git working tree checkout: fetch from `origin`, then detach at the commit
pub struct GitCheckout {
    work_tree: PathBuf,
}

impl GitCheckout {
    pub fn new(work_tree: impl Into<PathBuf>) -> Self {
        Self {
            work_tree: work_tree.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<()> {
        debug!("git {} in {}", args.join(" "), self.work_tree.display());

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_tree)
            .output()
            .await
            .context("Failed to execute git")?;

        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SourceCheckout for GitCheckout {
    async fn checkout(&self, commit: &str) -> Result<()> {
        self.git(&["fetch", "--quiet", "origin"]).await?;
        self.git(&["checkout", "--quiet", "--detach", commit]).await?;
        info!("Checked out {} in {}", commit, self.work_tree.display());
        Ok(())
    }
}

/// Leaves the source tree untouched
pub struct NoCheckout;

#[async_trait]
impl SourceCheckout for NoCheckout {
    async fn checkout(&self, _commit: &str) -> Result<()> {
        Ok(())
    }
}

/// Whether `path` is inside a git working tree
pub fn is_git_work_tree(path: &Path) -> bool {
    path.ancestors().any(|dir| dir.join(".git").exists())
}
