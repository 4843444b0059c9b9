//! Worktree provider.
//!
//! Each task gets an isolated filesystem checkout so concurrent agents never
//! trample each other's working directory. The git implementation shells out
//! to `git worktree` against the project repository; the repository itself is
//! validated with git2 at construction so misconfiguration fails early, at
//! daemon startup rather than mid-pipeline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Options for worktree creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorktreeOptions {
    /// Check out a detached HEAD instead of a branch. Detached checkouts let
    /// many worktrees share one base ref without branch-checkout conflicts.
    pub detach: bool,
    /// Pass `--force` to git.
    pub force: bool,
}

/// Isolated filesystem checkouts for tasks.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    /// Create a checkout of `base_ref` at `path`.
    async fn create(&self, path: &Path, base_ref: &str, opts: WorktreeOptions) -> Result<()>;

    /// Remove the checkout at `path`.
    async fn remove(&self, path: &Path, force: bool) -> Result<()>;
}

/// `git worktree` against the project repository.
pub struct GitWorktreeProvider {
    repo_root: PathBuf,
}

impl GitWorktreeProvider {
    /// Open and validate the repository containing `project_dir`.
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = git2::Repository::discover(project_dir).with_context(|| {
            format!("{} is not inside a git repository", project_dir.display())
        })?;
        let repo_root = repo
            .workdir()
            .ok_or_else(|| anyhow!("Repository at {} is bare", project_dir.display()))?
            .to_path_buf();
        Ok(Self { repo_root })
    }

    /// Drop stale worktree bookkeeping after a sweep of leftover directories.
    pub async fn prune(&self) -> Result<()> {
        let output = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_root)
            .output()
            .await
            .context("Failed to run git worktree prune")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git worktree prune failed: {}", stderr.trim()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorktreeProvider for GitWorktreeProvider {
    async fn create(&self, path: &Path, base_ref: &str, opts: WorktreeOptions) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut cmd = Command::new("git");
        cmd.args(["worktree", "add"]);
        if opts.force {
            cmd.arg("--force");
        }
        if opts.detach {
            cmd.arg("--detach");
        }
        cmd.arg(path).arg(base_ref).current_dir(&self.repo_root);

        let output = cmd
            .output()
            .await
            .context("Failed to run git worktree add")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git worktree add at {} failed: {}",
                path.display(),
                stderr.trim()
            ));
        }
        debug!("Created worktree at {} from {}", path.display(), base_ref);
        Ok(())
    }

    async fn remove(&self, path: &Path, force: bool) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["worktree", "remove"]);
        if force {
            cmd.arg("--force");
        }
        cmd.arg(path).current_dir(&self.repo_root);

        let output = cmd
            .output()
            .await
            .context("Failed to run git worktree remove")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git worktree remove at {} failed: {}",
                path.display(),
                stderr.trim()
            ));
        }
        debug!("Removed worktree at {}", path.display());
        Ok(())
    }
}
