//! Operator surface over the file task store: `foreman tasks ...`.

use anyhow::Result;
use console::style;

use foreman::config::Config;
use foreman::store::{FileTaskStore, TaskStatus};

pub fn cmd_tasks_add(config: &Config, title: &str, description: Option<&str>) -> Result<()> {
    config.ensure_directories()?;
    let store = FileTaskStore::new(config.tasks_file.clone());
    let record = store.add_task(title, description.unwrap_or(""))?;
    println!("Added task {} ({})", style(&record.id).green(), record.title);
    Ok(())
}

pub fn cmd_tasks_list(config: &Config) -> Result<()> {
    let store = FileTaskStore::new(config.tasks_file.clone());
    let tasks = store.list_tasks()?;
    if tasks.is_empty() {
        println!("No tasks");
        return Ok(());
    }
    for task in tasks {
        let status = match task.status {
            TaskStatus::Open => style(task.status.as_str()).green(),
            TaskStatus::Assigned => style(task.status.as_str()).yellow(),
            TaskStatus::Closed => style(task.status.as_str()).dim(),
        };
        let assignee = task
            .assigned_agent
            .as_deref()
            .map(|a| format!(" -> {}", a))
            .unwrap_or_default();
        println!("{}  [{}]{}  {}", task.id, status, assignee, task.title);
    }
    Ok(())
}

pub fn cmd_tasks_close(config: &Config, task_id: &str) -> Result<()> {
    let store = FileTaskStore::new(config.tasks_file.clone());
    store.close_task(task_id)?;
    println!("Closed task {}", style(task_id).dim());
    Ok(())
}
