//! Runtime configuration for Foreman.
//!
//! Everything lives under the project's `.foreman/` directory. Optional
//! overrides come from a `foreman.toml` at the project root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default agent-runtime endpoint.
const DEFAULT_RUNTIME_URL: &str = "http://127.0.0.1:7477";

/// Default ref task worktrees are checked out from.
const DEFAULT_BASE_REF: &str = "HEAD";

/// Default task-file poll interval in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Optional settings from `foreman.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForemanToml {
    pub runtime_url: Option<String>,
    pub base_ref: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub foreman_dir: PathBuf,
    pub tasks_file: PathBuf,
    pub worktrees_dir: PathBuf,
    pub log_dir: PathBuf,
    pub pid_file: PathBuf,
    pub runtime_url: String,
    pub base_ref: String,
    pub poll_interval: Duration,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let toml = Self::load_toml(&project_dir)?;
        let foreman_dir = project_dir.join(".foreman");

        Ok(Self {
            tasks_file: foreman_dir.join("tasks.json"),
            worktrees_dir: foreman_dir.join("worktrees"),
            log_dir: foreman_dir.join("logs"),
            pid_file: foreman_dir.join("foreman.pid"),
            runtime_url: toml
                .runtime_url
                .unwrap_or_else(|| DEFAULT_RUNTIME_URL.to_string()),
            base_ref: toml.base_ref.unwrap_or_else(|| DEFAULT_BASE_REF.to_string()),
            poll_interval: Duration::from_millis(
                toml.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            foreman_dir,
            project_dir,
            verbose,
        })
    }

    fn load_toml(project_dir: &Path) -> Result<ForemanToml> {
        let path = project_dir.join("foreman.toml");
        if !path.exists() {
            return Ok(ForemanToml::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid TOML in {}", path.display()))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.foreman_dir)
            .context("Failed to create .foreman directory")?;
        std::fs::create_dir_all(&self.worktrees_dir)
            .context("Failed to create worktrees directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }
}
