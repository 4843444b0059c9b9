//! Task state machine for the implement → review → merge pipeline.
//!
//! Each `Task` tracks one unit of work from `PendingImplementation` through
//! `Completed`, with `Failed` reachable from every non-terminal state. State
//! only moves forward; the two terminal states are absorbing.
//!
//! Assignment is split from completion so the orchestrator can mark a task
//! taken before doing slow, failable provisioning work; a second scheduling
//! pass that runs while a worktree is still being created must not pick up
//! the same task again.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TaskError;

/// Pipeline states, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    PendingImplementation,
    Implementing,
    AwaitingReview,
    Reviewing,
    AwaitingMerge,
    Merging,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingImplementation => "pending_implementation",
            Self::Implementing => "implementing",
            Self::AwaitingReview => "awaiting_review",
            Self::Reviewing => "reviewing",
            Self::AwaitingMerge => "awaiting_merge",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states absorb every further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of pipeline work, owned exclusively by the orchestrator's
/// in-memory task table.
#[derive(Debug, Clone)]
pub struct Task {
    task_id: String,
    state: TaskState,
    implementor_agent_id: Option<String>,
    reviewer_agent_id: Option<String>,
    merger_agent_id: Option<String>,
    worktree_path: Option<PathBuf>,
    session_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a task in `PendingImplementation`.
    pub fn new(task_id: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.to_string(),
            state: TaskState::PendingImplementation,
            implementor_agent_id: None,
            reviewer_agent_id: None,
            merger_agent_id: None,
            worktree_path: None,
            session_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn implementor_agent_id(&self) -> Option<&str> {
        self.implementor_agent_id.as_deref()
    }

    pub fn reviewer_agent_id(&self) -> Option<&str> {
        self.reviewer_agent_id.as_deref()
    }

    pub fn merger_agent_id(&self) -> Option<&str> {
        self.merger_agent_id.as_deref()
    }

    pub fn worktree_path(&self) -> Option<&Path> {
        self.worktree_path.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True exactly when an implementor may be assigned.
    pub fn can_assign_implementor(&self) -> bool {
        self.state == TaskState::PendingImplementation
    }

    /// True exactly when a reviewer may be assigned.
    pub fn can_assign_reviewer(&self) -> bool {
        self.state == TaskState::AwaitingReview
    }

    /// True exactly when a merger may be assigned.
    pub fn can_assign_merger(&self) -> bool {
        self.state == TaskState::AwaitingMerge
    }

    /// Assign the implementor and move to `Implementing`.
    pub fn assign_implementor(&mut self, agent_id: &str) -> Result<(), TaskError> {
        self.expect_state("assign_implementor", TaskState::PendingImplementation)?;
        self.implementor_agent_id = Some(agent_id.to_string());
        self.advance(TaskState::Implementing);
        Ok(())
    }

    /// Implementation finished; move to `AwaitingReview`.
    pub fn mark_implementation_complete(&mut self) -> Result<(), TaskError> {
        self.expect_state("mark_implementation_complete", TaskState::Implementing)?;
        self.advance(TaskState::AwaitingReview);
        Ok(())
    }

    /// Assign the reviewer and move to `Reviewing`.
    pub fn assign_reviewer(&mut self, agent_id: &str) -> Result<(), TaskError> {
        self.expect_state("assign_reviewer", TaskState::AwaitingReview)?;
        self.reviewer_agent_id = Some(agent_id.to_string());
        self.advance(TaskState::Reviewing);
        Ok(())
    }

    /// Review finished; move to `AwaitingMerge`.
    pub fn mark_review_complete(&mut self) -> Result<(), TaskError> {
        self.expect_state("mark_review_complete", TaskState::Reviewing)?;
        self.advance(TaskState::AwaitingMerge);
        Ok(())
    }

    /// Assign the merger and move to `Merging`.
    pub fn assign_merger(&mut self, agent_id: &str) -> Result<(), TaskError> {
        self.expect_state("assign_merger", TaskState::AwaitingMerge)?;
        self.merger_agent_id = Some(agent_id.to_string());
        self.advance(TaskState::Merging);
        Ok(())
    }

    /// Merge finished; move to the terminal `Completed` state.
    pub fn mark_merge_complete(&mut self) -> Result<(), TaskError> {
        self.expect_state("mark_merge_complete", TaskState::Merging)?;
        self.advance(TaskState::Completed);
        Ok(())
    }

    /// Move to the terminal `Failed` state from any non-terminal state.
    ///
    /// Calling this on an already-terminal task is an error; callers whose
    /// failure handling may race must check `is_terminal()` first.
    pub fn mark_failed(&mut self) -> Result<(), TaskError> {
        if self.state.is_terminal() {
            return Err(TaskError::TerminalState {
                operation: "mark_failed",
                actual: self.state,
            });
        }
        self.advance(TaskState::Failed);
        Ok(())
    }

    pub fn set_worktree_path(&mut self, path: PathBuf) {
        self.worktree_path = Some(path);
        self.touch();
    }

    pub fn set_session_id(&mut self, session_id: String) {
        self.session_id = Some(session_id);
        self.touch();
    }

    /// Forget the session after its owning role agent finished; the next
    /// role installs its own session id.
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.touch();
    }

    /// Take both resource handles for release. Leaves the task with neither,
    /// so a second release pass has nothing to do.
    pub fn take_resources(&mut self) -> (Option<String>, Option<PathBuf>) {
        let session = self.session_id.take();
        let worktree = self.worktree_path.take();
        if session.is_some() || worktree.is_some() {
            self.touch();
        }
        (session, worktree)
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: TaskState,
    ) -> Result<(), TaskError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                operation,
                actual: self.state,
                expected,
            })
        }
    }

    fn advance(&mut self, state: TaskState) {
        self.state = state;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
