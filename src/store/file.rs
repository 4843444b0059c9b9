//! File-backed task store.
//!
//! Tasks live in a single JSON file guarded by fs2 advisory locks, so the
//! CLI (`foreman tasks ...`) and the daemon can share it from separate
//! processes. The snapshot stream is a polling watcher: it re-reads the file
//! on an interval and emits a fresh full snapshot whenever the open set
//! changes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{TaskRecord, TaskSnapshot, TaskStatus, TaskStore};

/// Default watcher poll interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct FileTaskStore {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileTaskStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a new open task and return its record.
    pub fn add_task(&self, title: &str, description: &str) -> Result<TaskRecord> {
        let id = format!("t-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let record = TaskRecord::new(&id, title, description);
        let created = record.clone();
        self.with_records(|records| {
            records.push(record);
            Ok(())
        })?;
        Ok(created)
    }

    /// Mark a task closed. Closed tasks disappear from snapshots but stay in
    /// the file for the operator's record.
    pub fn close_task(&self, task_id: &str) -> Result<()> {
        self.with_records(|records| {
            let record = records
                .iter_mut()
                .find(|r| r.id == task_id)
                .with_context(|| format!("No task with id {}", task_id))?;
            record.status = TaskStatus::Closed;
            record.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Every record in the file, closed ones included.
    pub fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to open task file {}", self.path.display())
                });
            }
        };
        file.lock_shared()
            .with_context(|| format!("Failed to lock task file {}", self.path.display()))?;
        let result = read_records(&file);
        if let Err(e) = fs2::FileExt::unlock(&file) {
            warn!("Failed to unlock task file {}: {}", self.path.display(), e);
        }
        result
    }

    fn open_snapshot(&self) -> Result<TaskSnapshot> {
        let mut tasks = self.list_tasks()?;
        tasks.retain(|t| t.is_open());
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(TaskSnapshot::new(tasks))
    }

    fn set_assignment(&self, task_id: &str, agent: Option<&str>) -> Result<()> {
        self.with_records(|records| {
            let record = records
                .iter_mut()
                .find(|r| r.id == task_id)
                .with_context(|| format!("No task with id {}", task_id))?;
            record.assigned_agent = agent.map(str::to_string);
            record.status = if agent.is_some() {
                TaskStatus::Assigned
            } else {
                TaskStatus::Open
            };
            record.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Read-modify-write the task file under an exclusive lock.
    fn with_records<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<TaskRecord>) -> Result<()>,
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create task store directory {}", parent.display())
            })?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("Failed to open task file {}", self.path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock task file {}", self.path.display()))?;

        let result = (|| {
            let mut records = read_records(&file)?;
            mutate(&mut records)?;
            file.seek(SeekFrom::Start(0))?;
            file.set_len(0)?;
            let json = serde_json::to_string_pretty(&records)
                .context("Failed to serialize task records")?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("Failed to write task file {}", self.path.display()))?;
            Ok(())
        })();

        if let Err(e) = fs2::FileExt::unlock(&file) {
            warn!("Failed to unlock task file {}: {}", self.path.display(), e);
        }
        result
    }
}

fn read_records(mut file: &File) -> Result<Vec<TaskRecord>> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)
        .context("Failed to read task file")?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).context("Task file is not valid JSON")
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn subscribe_open_tasks(&self) -> Result<mpsc::Receiver<TaskSnapshot>> {
        let (tx, rx) = mpsc::channel(16);
        let store = FileTaskStore::new(self.path.clone()).with_poll_interval(self.poll_interval);

        tokio::spawn(async move {
            let mut last: Option<TaskSnapshot> = None;
            let mut interval = tokio::time::interval(store.poll_interval);
            loop {
                interval.tick().await;
                let snapshot = match store.open_snapshot() {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("Failed to read task file: {:#}", e);
                        continue;
                    }
                };
                if last.as_ref() == Some(&snapshot) {
                    continue;
                }
                debug!("Task file changed: {} open tasks", snapshot.tasks.len());
                last = Some(snapshot.clone());
                if tx.send(snapshot).await.is_err() {
                    // Subscriber dropped; stop watching.
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn assign(&self, task_id: &str, agent_id: &str) -> Result<()> {
        self.set_assignment(task_id, Some(agent_id))
    }

    async fn unassign(&self, task_id: &str) -> Result<()> {
        self.set_assignment(task_id, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> FileTaskStore {
        FileTaskStore::new(dir.join("tasks.json"))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn add_and_list_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let record = store.add_task("Fix flaky test", "in ci.rs").unwrap();
        assert!(record.id.starts_with("t-"));

        let tasks = store.list_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Fix flaky test");
        assert_eq!(tasks[0].status, TaskStatus::Open);
    }

    #[test]
    fn list_on_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn close_removes_from_open_snapshot_only() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let a = store.add_task("a", "").unwrap();
        let b = store.add_task("b", "").unwrap();
        store.close_task(&a.id).unwrap();

        let snapshot = store.open_snapshot().unwrap();
        assert_eq!(snapshot.ids(), [b.id.clone()].into_iter().collect());

        // Closed task is still in the file.
        assert_eq!(store.list_tasks().unwrap().len(), 2);
    }

    #[test]
    fn close_unknown_task_errors() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.close_task("t-nope").is_err());
    }

    #[tokio::test]
    async fn assignment_keeps_task_in_snapshots() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let record = store.add_task("a", "").unwrap();

        store.assign(&record.id, "impl-1").await.unwrap();
        let snapshot = store.open_snapshot().unwrap();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Assigned);
        assert_eq!(snapshot.tasks[0].assigned_agent.as_deref(), Some("impl-1"));

        store.unassign(&record.id).await.unwrap();
        let snapshot = store.open_snapshot().unwrap();
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Open);
        assert!(snapshot.tasks[0].assigned_agent.is_none());
    }

    #[tokio::test]
    async fn watcher_emits_on_change_only() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let mut rx = store.subscribe_open_tasks().await.unwrap();

        // Initial snapshot: empty set.
        let first = rx.recv().await.unwrap();
        assert!(first.tasks.is_empty());

        let record = store.add_task("a", "").unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.ids(), [record.id.clone()].into_iter().collect());

        // No change: nothing buffered after a few poll cycles.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());

        store.close_task(&record.id).unwrap();
        let third = rx.recv().await.unwrap();
        assert!(third.tasks.is_empty());
    }
}
