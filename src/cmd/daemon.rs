//! Daemon lifecycle commands: `foreman start`, `foreman stop`,
//! `foreman status`.

use anyhow::{Context, Result, bail};
use console::style;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use foreman::config::Config;
use foreman::daemon;
use foreman::store::FileTaskStore;

/// Run the daemon in the foreground until a shutdown signal.
pub async fn cmd_start(config: Config) -> Result<()> {
    config.ensure_directories()?;
    let _log_guard = init_logging(&config)?;
    daemon::run(config).await
}

/// Signal a running daemon via its PID file.
pub fn cmd_stop(config: &Config) -> Result<()> {
    let pid = std::fs::read_to_string(&config.pid_file)
        .with_context(|| {
            format!(
                "No PID file at {}; is the daemon running?",
                config.pid_file.display()
            )
        })?
        .trim()
        .to_string();

    if cfg!(not(unix)) {
        bail!("foreman stop is only supported on unix; stop pid {} manually", pid);
    }

    let status = std::process::Command::new("kill")
        .arg(&pid)
        .status()
        .context("Failed to run kill")?;
    if !status.success() {
        bail!("kill {} failed; remove {} if stale", pid, config.pid_file.display());
    }
    println!("Sent shutdown signal to foreman (pid {})", pid);
    Ok(())
}

/// Print daemon liveness and a task summary.
pub fn cmd_status(config: &Config) -> Result<()> {
    match std::fs::read_to_string(&config.pid_file) {
        Ok(pid) => println!("Daemon: {} (pid {})", style("running").green(), pid.trim()),
        Err(_) => println!("Daemon: {}", style("not running").dim()),
    }

    let store = FileTaskStore::new(config.tasks_file.clone());
    let tasks = store.list_tasks()?;
    let open = tasks.iter().filter(|t| t.is_open()).count();
    let closed = tasks.len() - open;
    println!("Tasks: {} open, {} closed", open, closed);
    Ok(())
}

/// Console + daily rolling file logging for the daemon. The returned guard
/// must stay alive for the daemon's lifetime.
fn init_logging(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("foreman={}", default_level)));

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "foreman.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}
