//! Daemon bootstrap: PID file, signal handling, and wiring the providers
//! into one orchestrator. The daemon runs in the foreground; process
//! supervision (systemd, a terminal, launchd) is the operator's choice.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::config::Config;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::providers::{GitWorktreeProvider, HttpSessionProvider, WorktreeProvider};
use crate::store::FileTaskStore;

/// Run the orchestrator daemon until the task stream ends or a shutdown
/// signal arrives.
pub async fn run(config: Config) -> Result<()> {
    config.ensure_directories()?;
    write_pid_file(&config.pid_file)?;

    let result = run_inner(&config).await;

    if let Err(e) = std::fs::remove_file(&config.pid_file) {
        warn!("Failed to remove PID file {}: {}", config.pid_file.display(), e);
    }
    result
}

async fn run_inner(config: &Config) -> Result<()> {
    let worktrees = Arc::new(
        GitWorktreeProvider::new(&config.project_dir)
            .context("Foreman must run inside a git repository")?,
    );
    sweep_stale_worktrees(config, worktrees.as_ref()).await;

    let sessions = Arc::new(
        HttpSessionProvider::connect(&config.runtime_url)
            .await
            .with_context(|| format!("Failed to connect to agent runtime at {}", config.runtime_url))?,
    );
    let store = Arc::new(
        FileTaskStore::new(config.tasks_file.clone()).with_poll_interval(config.poll_interval),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            worktrees_dir: config.worktrees_dir.clone(),
            base_ref: config.base_ref.clone(),
        },
        store,
        sessions,
        worktrees,
    ));

    info!(
        "Foreman daemon started for {} (runtime {})",
        config.project_dir.display(),
        config.runtime_url
    );

    let runner = Arc::clone(&orchestrator);
    let mut loop_handle = tokio::spawn(async move { runner.start().await });

    let loop_finished = tokio::select! {
        result = &mut loop_handle => {
            match result {
                Ok(Ok(())) => info!("Orchestrator loop finished"),
                Ok(Err(e)) => warn!("Orchestrator loop failed: {:#}", e),
                Err(e) => warn!("Orchestrator loop panicked: {}", e),
            }
            true
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            false
        }
    };

    orchestrator.stop().await;
    // The loop observes the cancellation at its next suspension point.
    if !loop_finished
        && let Err(e) = loop_handle.await
        && !e.is_cancelled()
    {
        warn!("Orchestrator loop join failed: {}", e);
    }
    info!("Foreman daemon exited");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Refuse to start if another daemon already holds the PID file.
fn write_pid_file(path: &Path) -> Result<()> {
    if path.exists() {
        let pid = std::fs::read_to_string(path).unwrap_or_default();
        bail!(
            "PID file {} already exists (pid {}). Is another foreman running? \
             Remove the file if it is stale.",
            path.display(),
            pid.trim()
        );
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("Failed to write PID file {}", path.display()))?;
    Ok(())
}

/// A previous run may have crashed with worktrees still on disk. The core
/// keeps no record of them, so leftovers are discarded, never adopted.
async fn sweep_stale_worktrees(config: &Config, worktrees: &GitWorktreeProvider) {
    let entries = match std::fs::read_dir(&config.worktrees_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(
                "Failed to scan worktree root {}: {}",
                config.worktrees_dir.display(),
                e
            );
            return;
        }
    };
    let mut swept = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        info!("Sweeping stale worktree {}", path.display());
        if let Err(e) = worktrees.remove(&path, true).await {
            warn!("Failed to remove stale worktree {}: {:#}", path.display(), e);
            // Registered with git or not, the directory has to go.
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!("Failed to delete {}: {}", path.display(), e);
            }
        }
        swept += 1;
    }
    if swept > 0 {
        if let Err(e) = worktrees.prune().await {
            warn!("git worktree prune failed after sweep: {:#}", e);
        }
        info!("Swept {} stale worktrees", swept);
    }
}
