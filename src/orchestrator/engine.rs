//! The orchestrator control loop.
//!
//! One cooperative `select!` loop consumes two external sources: full
//! open-task snapshots from the task store and session events from the agent
//! runtime. Reconciliation diffs each snapshot against the in-memory task
//! table; event routing correlates idle notifications to tasks by session id
//! and advances the pipeline. All shared state (task table, agent arena)
//! sits behind one mutex locked per pass, so the two activities never
//! interleave mid-pass.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::agent::{Role, RoleAgent};
use crate::errors::{ProvisionError, TaskError};
use crate::orchestrator::arena::AgentArena;
use crate::providers::events::SessionEvent;
use crate::providers::{SessionProvider, WorktreeOptions, WorktreeProvider};
use crate::store::{TaskRecord, TaskSnapshot, TaskStore};
use crate::task::{Task, TaskState};

/// Orchestrator settings that do not come from providers.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root under which per-task worktrees are created.
    pub worktrees_dir: PathBuf,
    /// Ref each task's worktree is checked out from.
    pub base_ref: String,
}

impl OrchestratorConfig {
    /// Worktree paths derive deterministically from the task id.
    pub fn worktree_path_for(&self, task_id: &str) -> PathBuf {
        self.worktrees_dir.join(task_id)
    }
}

/// Snapshot of one active role agent, as reported to the daemon/CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunningAgent {
    pub task_id: String,
    pub agent_id: String,
    pub role: Role,
    pub started_at: DateTime<Utc>,
    pub state: TaskState,
    pub worktree_path: Option<PathBuf>,
    pub session_id: Option<String>,
}

/// Everything both loops mutate, behind one lock.
#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    records: HashMap<String, TaskRecord>,
    arena: AgentArena,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn TaskStore>,
    sessions: Arc<dyn SessionProvider>,
    worktrees: Arc<dyn WorktreeProvider>,
    inner: Mutex<Inner>,
    running: AtomicBool,
    cancel: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn TaskStore>,
        sessions: Arc<dyn SessionProvider>,
        worktrees: Arc<dyn WorktreeProvider>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            store,
            sessions,
            worktrees,
            inner: Mutex::new(Inner::default()),
            running: AtomicBool::new(false),
            cancel,
        }
    }

    /// True iff `start()` has been called and `stop()` has not.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the control loop. Idempotent: a second call while running is a
    /// logged no-op. Returns when the task-snapshot stream ends or `stop()`
    /// cancels the loop.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Orchestrator already running");
            return Ok(());
        }
        let _ = self.cancel.send(false);

        let mut snapshots = match self.store.subscribe_open_tasks().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e).context("Failed to subscribe to the task store");
            }
        };
        let mut events = self.sessions.subscribe_events();
        let mut cancel = self.cancel.subscribe();

        info!("Orchestrator started");
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!("Orchestrator cancelled");
                        break;
                    }
                }
                snapshot = snapshots.recv() => {
                    match snapshot {
                        Some(snapshot) => self.reconcile(snapshot).await,
                        None => {
                            info!("Task snapshot stream ended");
                            break;
                        }
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => self.route_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Session event feed lagged; {} events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Session event feed closed");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Stop the loop and tear everything down: every tracked task's agents
    /// (in pipeline order), every task's resources, the table itself, and
    /// any session the runtime still considers active. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Orchestrator not running");
            return;
        }
        let _ = self.cancel.send(true);

        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let mut task_ids: Vec<String> = inner.tasks.keys().cloned().collect();
        task_ids.sort();
        for task_id in &task_ids {
            for mut agent in inner.arena.remove_all(task_id) {
                agent.stop().await;
            }
            if let Some(mut task) = inner.tasks.remove(task_id) {
                self.release_resources(&mut task).await;
            }
        }
        inner.records.clear();

        // Anything not explicitly released above.
        match self.sessions.active_sessions().await {
            Ok(leftover) => {
                for session_id in leftover {
                    if let Err(e) = self.sessions.remove_session(&session_id).await {
                        warn!("Failed to remove leftover session {}: {:#}", session_id, e);
                    }
                }
            }
            Err(e) => warn!("Failed to list runtime sessions during shutdown: {:#}", e),
        }
        info!("Orchestrator stopped");
    }

    /// One entry per active role agent per task.
    pub async fn running_agents(&self) -> Vec<RunningAgent> {
        let inner = self.inner.lock().await;
        let mut agents: Vec<RunningAgent> = inner
            .arena
            .iter()
            .filter(|agent| agent.is_running())
            .filter_map(|agent| {
                let task = inner.tasks.get(agent.task_id())?;
                Some(RunningAgent {
                    task_id: agent.task_id().to_string(),
                    agent_id: agent.agent_id().to_string(),
                    role: agent.role(),
                    started_at: agent.started_at(),
                    state: task.state(),
                    worktree_path: task.worktree_path().map(|p| p.to_path_buf()),
                    session_id: agent.session_id().map(str::to_string),
                })
            })
            .collect();
        agents.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        agents
    }

    /// Process one full open-task snapshot: create new tasks, retire
    /// externally closed ones, then schedule any role whose predicate holds.
    /// Creation runs before retirement so a task closed and reopened within
    /// one snapshot is treated as still open.
    async fn reconcile(&self, snapshot: TaskSnapshot) {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let open_ids = snapshot.ids();

        for record in &snapshot.tasks {
            if !inner.tasks.contains_key(&record.id) {
                info!("Tracking new task {} ({})", record.id, record.title);
                inner.tasks.insert(record.id.clone(), Task::new(&record.id));
            }
        }
        inner.records = snapshot
            .tasks
            .iter()
            .map(|r| (r.id.clone(), r.clone()))
            .collect();

        let closed: Vec<String> = inner
            .tasks
            .keys()
            .filter(|id| !open_ids.contains(*id))
            .cloned()
            .collect();
        for task_id in closed {
            info!("Task {} closed externally; releasing", task_id);
            self.retire_task(inner, &task_id).await;
        }

        let mut task_ids: Vec<String> = inner.tasks.keys().cloned().collect();
        task_ids.sort();
        for task_id in task_ids {
            let Some(task) = inner.tasks.get(&task_id) else {
                continue;
            };
            let role = if task.can_assign_implementor() {
                Role::Implementor
            } else if task.can_assign_reviewer() {
                Role::Reviewer
            } else if task.can_assign_merger() {
                Role::Merger
            } else {
                continue;
            };
            if inner.arena.contains(&task_id, role) {
                continue;
            }
            if let Err(e) = self.start_role(inner, &task_id, role).await {
                error!(
                    "BUG: scheduling {} for task {} hit an invalid transition: {}",
                    role, task_id, e
                );
            }
        }
    }

    /// Route one session event. Only idle events matter; an idle event whose
    /// session no task owns, or that arrives outside an active role, is
    /// silently ignored.
    async fn route_event(&self, event: SessionEvent) {
        let SessionEvent::SessionIdle { session_id } = event else {
            debug!("Ignoring non-idle session event");
            return;
        };
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;

        let Some(task_id) = inner
            .tasks
            .values()
            .find(|t| t.session_id() == Some(session_id.as_str()))
            .map(|t| t.task_id().to_string())
        else {
            debug!(
                "Idle event for session {} matches no tracked task",
                session_id
            );
            return;
        };

        let role = match inner.tasks.get(&task_id).map(Task::state) {
            Some(TaskState::Implementing) => Role::Implementor,
            Some(TaskState::Reviewing) => Role::Reviewer,
            Some(TaskState::Merging) => Role::Merger,
            state => {
                debug!(
                    "Ignoring idle event for task {} in state {:?}",
                    task_id, state
                );
                return;
            }
        };
        self.finish_role(inner, &task_id, role).await;
    }

    /// A role's session went idle: discard the agent, advance the task, and
    /// either start the next role or, after the merger, finalize.
    async fn finish_role(&self, inner: &mut Inner, task_id: &str, role: Role) {
        if let Some(mut agent) = inner.arena.remove(task_id, role) {
            agent.finish().await;
        } else {
            warn!("No {} agent tracked for task {} at completion", role, task_id);
        }

        let next = {
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return;
            };
            task.clear_session();
            let advanced = match role {
                Role::Implementor => task
                    .mark_implementation_complete()
                    .map(|_| Some(Role::Reviewer)),
                Role::Reviewer => task.mark_review_complete().map(|_| Some(Role::Merger)),
                Role::Merger => task.mark_merge_complete().map(|_| None),
            };
            match advanced {
                Ok(next) => {
                    info!("Task {} advanced to {}", task_id, task.state());
                    next
                }
                Err(e) => {
                    error!("BUG: completion for task {} rejected: {}", task_id, e);
                    return;
                }
            }
        };

        match next {
            Some(next_role) => {
                if let Err(e) = self.start_role(inner, task_id, next_role).await {
                    error!(
                        "BUG: starting {} for task {} hit an invalid transition: {}",
                        next_role, task_id, e
                    );
                }
            }
            None => {
                info!("Task {} completed; releasing resources", task_id);
                if let Some(mut task) = inner.tasks.remove(task_id) {
                    self.release_resources(&mut task).await;
                }
                inner.records.remove(task_id);
            }
        }
    }

    /// Provision resources and start one role agent.
    ///
    /// The task is marked assigned before any slow provisioning so a second
    /// scheduling pass cannot pick it up again; each later step unwinds only
    /// what already succeeded. Provisioning failures route to `fail_role`
    /// and never escape; only invalid transitions (programming errors)
    /// propagate.
    async fn start_role(
        &self,
        inner: &mut Inner,
        task_id: &str,
        role: Role,
    ) -> Result<(), TaskError> {
        let record = inner.records.get(task_id).cloned().unwrap_or_else(|| {
            warn!("No store record for task {}; using a bare one", task_id);
            TaskRecord::new(task_id, task_id, "")
        });
        let mut agent = RoleAgent::new(
            role,
            task_id,
            Arc::clone(&self.sessions),
            Arc::clone(&self.store),
        );
        let agent_id = agent.agent_id().to_string();

        {
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return Ok(());
            };
            match role {
                Role::Implementor => task.assign_implementor(&agent_id)?,
                Role::Reviewer => task.assign_reviewer(&agent_id)?,
                Role::Merger => task.assign_merger(&agent_id)?,
            }
        }

        // The implementor creates the worktree; later roles reuse it and
        // treat its absence as an orchestrator invariant violation.
        let worktree = if role == Role::Implementor {
            let path = self.config.worktree_path_for(task_id);
            let opts = WorktreeOptions {
                detach: true,
                force: false,
            };
            if let Err(source) = self
                .worktrees
                .create(&path, &self.config.base_ref, opts)
                .await
            {
                let err = ProvisionError::WorktreeCreate { path, source };
                self.fail_role(inner, task_id, role, &err).await;
                return Ok(());
            }
            if let Some(task) = inner.tasks.get_mut(task_id) {
                task.set_worktree_path(path.clone());
            }
            path
        } else {
            match inner
                .tasks
                .get(task_id)
                .and_then(|t| t.worktree_path().map(|p| p.to_path_buf()))
            {
                Some(path) => path,
                None => {
                    let err = ProvisionError::MissingWorktree {
                        task_id: task_id.to_string(),
                        role,
                    };
                    self.fail_role(inner, task_id, role, &err).await;
                    return Ok(());
                }
            }
        };

        match agent.start(&record, &worktree).await {
            Ok(()) => {
                if let Some(session_id) = agent.session_id().map(str::to_string)
                    && let Some(task) = inner.tasks.get_mut(task_id)
                {
                    task.set_session_id(session_id);
                }
                if inner.arena.insert(agent).is_some() {
                    error!("BUG: displaced an existing {} agent for task {}", role, task_id);
                }
            }
            Err(err) => {
                self.fail_role(inner, task_id, role, &err).await;
            }
        }
        Ok(())
    }

    /// Provisioning failed for a role: discard any tracked agent, release
    /// the task's resources, and mark the task failed. The task stays in the
    /// table until the store stops reporting it open.
    async fn fail_role(&self, inner: &mut Inner, task_id: &str, role: Role, err: &ProvisionError) {
        error!("{} provisioning for task {} failed: {}", role, task_id, err);
        if let Some(mut agent) = inner.arena.remove(task_id, role) {
            agent.stop().await;
        }
        if let Some(task) = inner.tasks.get_mut(task_id) {
            self.release_resources(task).await;
            if !task.is_terminal()
                && let Err(e) = task.mark_failed()
            {
                error!("BUG: could not mark task {} failed: {}", task_id, e);
            }
        }
    }

    /// Stop agents and release resources for an externally closed task,
    /// then drop it from the table.
    async fn retire_task(&self, inner: &mut Inner, task_id: &str) {
        for mut agent in inner.arena.remove_all(task_id) {
            agent.stop().await;
        }
        if let Some(mut task) = inner.tasks.remove(task_id) {
            self.release_resources(&mut task).await;
        }
        inner.records.remove(task_id);
    }

    /// Release the (session, worktree) pair. Each step is independently
    /// best-effort: a failure is logged and never blocks the other step.
    /// The handles are taken off the task, so a second release is a no-op.
    async fn release_resources(&self, task: &mut Task) {
        let (session, worktree) = task.take_resources();
        if let Some(session_id) = session
            && let Err(e) = self.sessions.remove_session(&session_id).await
        {
            warn!(
                "Failed to remove session {} for task {}: {:#}",
                session_id,
                task.task_id(),
                e
            );
        }
        if let Some(path) = worktree
            && let Err(e) = self.worktrees.remove(&path, true).await
        {
            warn!(
                "Failed to remove worktree {} for task {}: {:#}",
                path.display(),
                task.task_id(),
                e
            );
        }
    }
}
