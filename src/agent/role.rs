//! The three pipeline roles.

use serde::{Deserialize, Serialize};

use crate::agent::prompts;
use crate::store::TaskRecord;
use std::path::Path;

/// Role a task-scoped agent performs. One agent of each role runs per task,
/// in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Writes the change in the task's worktree.
    Implementor,
    /// Reads the diff and leaves review feedback in the worktree.
    Reviewer,
    /// Folds the reviewed change back into the base branch.
    Merger,
}

impl Role {
    /// Pipeline order. Also the order agents are stopped in during cleanup.
    pub const ORDER: [Role; 3] = [Role::Implementor, Role::Reviewer, Role::Merger];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implementor => "implementor",
            Self::Reviewer => "reviewer",
            Self::Merger => "merger",
        }
    }

    /// Whether starting this role records an assignment in the task store.
    /// Only the implementor does: it is the first role to take the task, and
    /// the store tracks task-level assignment, not per-role assignment.
    pub fn requires_assignment(&self) -> bool {
        matches!(self, Self::Implementor)
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Implementor => prompts::implementor_system_prompt(),
            Self::Reviewer => prompts::reviewer_system_prompt(),
            Self::Merger => prompts::merger_system_prompt(),
        }
    }

    /// Fill the role's initial-message template for a task.
    pub fn initial_prompt(&self, record: &TaskRecord, worktree: &Path) -> String {
        match self {
            Self::Implementor => prompts::build_implementation_prompt(record, worktree),
            Self::Reviewer => prompts::build_review_prompt(record, worktree),
            Self::Merger => prompts::build_merge_prompt(record, worktree),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implementor" => Ok(Self::Implementor),
            "reviewer" => Ok(Self::Reviewer),
            "merger" => Ok(Self::Merger),
            other => Err(format!("Unknown role: '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_pipeline_order() {
        assert_eq!(
            Role::ORDER,
            [Role::Implementor, Role::Reviewer, Role::Merger]
        );
    }

    #[test]
    fn only_implementor_requires_assignment() {
        assert!(Role::Implementor.requires_assignment());
        assert!(!Role::Reviewer.requires_assignment());
        assert!(!Role::Merger.requires_assignment());
    }

    #[test]
    fn roles_roundtrip_through_strings() {
        for role in Role::ORDER {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn system_prompts_are_distinct() {
        assert_ne!(
            Role::Implementor.system_prompt(),
            Role::Reviewer.system_prompt()
        );
        assert_ne!(Role::Reviewer.system_prompt(), Role::Merger.system_prompt());
    }
}
