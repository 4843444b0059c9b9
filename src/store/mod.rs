//! Task store: the authoritative record of which tasks exist and are open.
//!
//! The orchestrator never persists pipeline state of its own; it consumes
//! full open-task snapshots from a store and rebuilds its in-memory table
//! from the next snapshot after a restart.

pub mod file;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use file::FileTaskStore;

/// Store-side status of a task. `Assigned` still counts as open to the
/// orchestrator; only `Closed` removes a task from snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    Assigned,
    Closed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::Closed => "closed",
        }
    }
}

/// One task as the store records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Open,
            assigned_agent: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != TaskStatus::Closed
    }
}

/// The full current set of open tasks. Snapshots are complete sets, never
/// deltas: a task absent from a snapshot has been closed externally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSnapshot {
    pub tasks: Vec<TaskRecord>,
}

impl TaskSnapshot {
    pub fn new(tasks: Vec<TaskRecord>) -> Self {
        Self { tasks }
    }

    pub fn ids(&self) -> HashSet<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == task_id)
    }
}

/// External system of record for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Subscribe to a live stream of full open-task snapshots. The first
    /// snapshot describes the current state; later ones are emitted as the
    /// open set changes. The stream ends when the store shuts down.
    async fn subscribe_open_tasks(&self) -> Result<mpsc::Receiver<TaskSnapshot>>;

    /// Record that an agent has taken the task.
    async fn assign(&self, task_id: &str, agent_id: &str) -> Result<()>;

    /// Release a previous assignment, returning the task to plain open.
    async fn unassign(&self, task_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ids_cover_all_records() {
        let snapshot = TaskSnapshot::new(vec![
            TaskRecord::new("t-1", "one", ""),
            TaskRecord::new("t-2", "two", ""),
        ]);
        let ids = snapshot.ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("t-1"));
        assert!(ids.contains("t-2"));
        assert!(snapshot.get("t-2").is_some());
        assert!(snapshot.get("t-3").is_none());
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = TaskRecord::new("t-1", "Add retry logic", "Wrap the client calls");
        let json = serde_json::to_string(&record).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert!(json.contains("\"open\""));
    }

    #[test]
    fn assigned_records_are_still_open() {
        let mut record = TaskRecord::new("t-1", "one", "");
        record.status = TaskStatus::Assigned;
        assert!(record.is_open());
        record.status = TaskStatus::Closed;
        assert!(!record.is_open());
    }
}
