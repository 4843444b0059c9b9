use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

use foreman::config::Config;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version, about = "Local orchestrator for autonomous coding agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator daemon in the foreground
    Start,
    /// Signal a running daemon to shut down
    Stop,
    /// Show daemon liveness and a task summary
    Status,
    /// Manage the task backlog
    Tasks {
        #[command(subcommand)]
        command: TasksCommands,
    },
}

#[derive(Subcommand)]
pub enum TasksCommands {
    /// Add an open task
    Add {
        title: String,
        /// Longer description handed to the implementor
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List every task in the store
    List,
    /// Close a task; the daemon releases its agents and resources
    Close { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.verbose)?;

    match &cli.command {
        Commands::Start => cmd::cmd_start(config).await?,
        Commands::Stop => cmd::cmd_stop(&config)?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Tasks { command } => match command {
            TasksCommands::Add { title, description } => {
                cmd::cmd_tasks_add(&config, title, description.as_deref())?
            }
            TasksCommands::List => cmd::cmd_tasks_list(&config)?,
            TasksCommands::Close { id } => cmd::cmd_tasks_close(&config, id)?,
        },
    }

    Ok(())
}
