//! Typed error hierarchy for the Foreman orchestrator.
//!
//! Two top-level enums cover the two failure classes the core distinguishes:
//! - `TaskError`: invalid state-machine transitions (programming errors,
//!   allowed to propagate to the immediate caller)
//! - `ProvisionError`: worktree/session provisioning failures (expected at
//!   runtime, routed to the task's failure handler)
//!
//! Cleanup failures are not typed: they are logged and swallowed at the
//! cleanup call site and never escalate.

use thiserror::Error;

use crate::agent::Role;
use crate::task::TaskState;

/// Errors from the task state machine.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{operation} is invalid in state {actual} (expected {expected})")]
    InvalidTransition {
        operation: &'static str,
        actual: TaskState,
        expected: TaskState,
    },

    #[error("{operation} called on task already in terminal state {actual}")]
    TerminalState {
        operation: &'static str,
        actual: TaskState,
    },
}

/// Errors from resource provisioning for a role agent.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to create worktree at {path}: {source}")]
    WorktreeCreate {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to create {role} session for task {task_id}: {source}")]
    SessionCreate {
        task_id: String,
        role: Role,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to deliver initial prompt to session {session_id}: {source}")]
    InitialMessage {
        session_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Task {task_id} has no worktree but a {role} agent was requested")]
    MissingWorktree { task_id: String, role: Role },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_states() {
        let err = TaskError::InvalidTransition {
            operation: "assign_reviewer",
            actual: TaskState::Implementing,
            expected: TaskState::AwaitingReview,
        };
        let msg = err.to_string();
        assert!(msg.contains("assign_reviewer"));
        assert!(msg.contains("implementing"));
        assert!(msg.contains("awaiting_review"));
    }

    #[test]
    fn terminal_state_error_is_matchable() {
        let err = TaskError::TerminalState {
            operation: "mark_failed",
            actual: TaskState::Completed,
        };
        assert!(matches!(err, TaskError::TerminalState { .. }));
    }

    #[test]
    fn missing_worktree_names_task_and_role() {
        let err = ProvisionError::MissingWorktree {
            task_id: "t-42".into(),
            role: Role::Reviewer,
        };
        let msg = err.to_string();
        assert!(msg.contains("t-42"));
        assert!(msg.contains("reviewer"));
    }

    #[test]
    fn provision_errors_carry_sources() {
        let err = ProvisionError::SessionCreate {
            task_id: "t-1".into(),
            role: Role::Implementor,
            source: anyhow::anyhow!("connection refused"),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
