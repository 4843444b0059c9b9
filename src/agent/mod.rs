//! Role agents: the per-role lifecycle wrapper around one runtime session.
//!
//! The three pipeline roles share one implementation parameterized by
//! `Role`: the role contributes its system prompt, its initial-message
//! template, and whether starting it records an assignment in the task
//! store. A role agent owns its session for exactly as long as it runs; the
//! worktree belongs to the task and outlives any single role.

pub mod prompts;
pub mod role;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::ProvisionError;
use crate::providers::SessionProvider;
use crate::store::{TaskRecord, TaskStore};

pub use role::Role;

/// One role's agent for one task. Ephemeral: constructed when the role is
/// assigned, discarded when the role completes, errors, or the task goes
/// away.
pub struct RoleAgent {
    task_id: String,
    agent_id: String,
    role: Role,
    session_id: Option<String>,
    running: bool,
    started_at: DateTime<Utc>,
    sessions: Arc<dyn SessionProvider>,
    store: Arc<dyn TaskStore>,
}

impl RoleAgent {
    pub fn new(
        role: Role,
        task_id: &str,
        sessions: Arc<dyn SessionProvider>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        let agent_id = format!("{}-{}", role.as_str(), &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            task_id: task_id.to_string(),
            agent_id,
            role,
            session_id: None,
            running: false,
            started_at: Utc::now(),
            sessions,
            store,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Local view only; says nothing about the external session's liveness.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Create the role's session in the task's worktree and send the initial
    /// prompt. No-op if already running.
    ///
    /// On failure everything this call created is rolled back (session
    /// removed, store assignment released) before the error is returned; the
    /// orchestrator routes it to the role's failure handler.
    pub async fn start(
        &mut self,
        record: &TaskRecord,
        worktree: &Path,
    ) -> Result<(), ProvisionError> {
        if self.running {
            debug!("{} agent for task {} already running", self.role, self.task_id);
            return Ok(());
        }
        self.started_at = Utc::now();

        let session_id = self
            .sessions
            .create_session(worktree, self.role.system_prompt())
            .await
            .map_err(|source| ProvisionError::SessionCreate {
                task_id: self.task_id.clone(),
                role: self.role,
                source,
            })?;

        // Best-effort: a store that cannot record the assignment should not
        // stop the work itself.
        if self.role.requires_assignment()
            && let Err(e) = self.store.assign(&self.task_id, &self.agent_id).await
        {
            warn!(
                "Failed to record assignment of task {} to {}: {:#}",
                self.task_id, self.agent_id, e
            );
        }

        let prompt = self.role.initial_prompt(record, worktree);
        if let Err(source) = self.sessions.send_message(&session_id, &prompt).await {
            self.rollback_start(&session_id).await;
            return Err(ProvisionError::InitialMessage {
                session_id,
                source,
            });
        }

        self.session_id = Some(session_id);
        self.running = true;
        info!(
            "Started {} agent {} for task {}",
            self.role, self.agent_id, self.task_id
        );
        Ok(())
    }

    /// Stop the agent and remove its session. No-op if not running; session
    /// removal failures are logged, never raised.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(session_id) = self.session_id.take()
            && let Err(e) = self.sessions.remove_session(&session_id).await
        {
            warn!(
                "Failed to remove session {} for {} agent on task {}: {:#}",
                session_id, self.role, self.task_id, e
            );
        }
        info!(
            "Stopped {} agent {} for task {}",
            self.role, self.agent_id, self.task_id
        );
    }

    /// The idle seam: the session has no more pending work, so this role is
    /// finished. Removes the session and marks the agent not running. Makes
    /// no judgment about whether the work is any good; that belongs to the
    /// next role in the pipeline.
    pub async fn finish(&mut self) {
        if let Some(session_id) = self.session_id.take()
            && let Err(e) = self.sessions.remove_session(&session_id).await
        {
            warn!(
                "Failed to remove finished session {} for task {}: {:#}",
                session_id, self.task_id, e
            );
        }
        self.running = false;
        info!(
            "{} agent {} finished task {}",
            self.role, self.agent_id, self.task_id
        );
    }

    async fn rollback_start(&self, session_id: &str) {
        if self.role.requires_assignment()
            && let Err(e) = self.store.unassign(&self.task_id).await
        {
            warn!(
                "Failed to release assignment of task {} during rollback: {:#}",
                self.task_id, e
            );
        }
        if let Err(e) = self.sessions.remove_session(session_id).await {
            warn!(
                "Failed to remove session {} during rollback: {:#}",
                session_id, e
            );
        }
    }
}

impl std::fmt::Debug for RoleAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleAgent")
            .field("task_id", &self.task_id)
            .field("agent_id", &self.agent_id)
            .field("role", &self.role)
            .field("session_id", &self.session_id)
            .field("running", &self.running)
            .finish()
    }
}
