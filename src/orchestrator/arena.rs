//! Arena of active role agents, owned exclusively by the orchestrator.
//!
//! One sub-map per role, keyed by task id. Only the reconciliation and
//! event-routing passes mutate it, and membership is checked before any
//! provisioning, which is what enforces "at most one agent per (task, role)".

use std::collections::HashMap;

use crate::agent::{Role, RoleAgent};

#[derive(Debug, Default)]
pub struct AgentArena {
    implementors: HashMap<String, RoleAgent>,
    reviewers: HashMap<String, RoleAgent>,
    mergers: HashMap<String, RoleAgent>,
}

impl AgentArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, role: Role) -> &HashMap<String, RoleAgent> {
        match role {
            Role::Implementor => &self.implementors,
            Role::Reviewer => &self.reviewers,
            Role::Merger => &self.mergers,
        }
    }

    fn map_mut(&mut self, role: Role) -> &mut HashMap<String, RoleAgent> {
        match role {
            Role::Implementor => &mut self.implementors,
            Role::Reviewer => &mut self.reviewers,
            Role::Merger => &mut self.mergers,
        }
    }

    pub fn contains(&self, task_id: &str, role: Role) -> bool {
        self.map(role).contains_key(task_id)
    }

    /// Track an agent under its own task id and role. Returns the displaced
    /// agent if one was already tracked; callers treat that as a bug.
    pub fn insert(&mut self, agent: RoleAgent) -> Option<RoleAgent> {
        let key = agent.task_id().to_string();
        self.map_mut(agent.role()).insert(key, agent)
    }

    pub fn remove(&mut self, task_id: &str, role: Role) -> Option<RoleAgent> {
        self.map_mut(role).remove(task_id)
    }

    /// Remove every agent for a task, in pipeline order.
    pub fn remove_all(&mut self, task_id: &str) -> Vec<RoleAgent> {
        Role::ORDER
            .iter()
            .filter_map(|role| self.remove(task_id, *role))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleAgent> {
        Role::ORDER.iter().flat_map(|role| self.map(*role).values())
    }

    pub fn len(&self) -> usize {
        self.implementors.len() + self.reviewers.len() + self.mergers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::SessionProvider;
    use crate::providers::events::SessionEvent;
    use crate::store::{TaskSnapshot, TaskStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;
    use tokio::sync::{broadcast, mpsc};

    struct NullSessions(broadcast::Sender<SessionEvent>);

    #[async_trait]
    impl SessionProvider for NullSessions {
        async fn create_session(&self, _: &Path, _: &str) -> Result<String> {
            Ok("sess".into())
        }
        async fn send_message(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_session(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn active_sessions(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
            self.0.subscribe()
        }
    }

    struct NullStore;

    #[async_trait]
    impl TaskStore for NullStore {
        async fn subscribe_open_tasks(&self) -> Result<mpsc::Receiver<TaskSnapshot>> {
            let (_, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn assign(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn unassign(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn agent(role: Role, task_id: &str) -> RoleAgent {
        let (tx, _) = broadcast::channel(4);
        RoleAgent::new(role, task_id, Arc::new(NullSessions(tx)), Arc::new(NullStore))
    }

    #[test]
    fn insert_and_membership() {
        let mut arena = AgentArena::new();
        assert!(arena.is_empty());

        assert!(arena.insert(agent(Role::Implementor, "t-1")).is_none());
        assert!(arena.contains("t-1", Role::Implementor));
        assert!(!arena.contains("t-1", Role::Reviewer));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn one_agent_per_task_and_role() {
        let mut arena = AgentArena::new();
        arena.insert(agent(Role::Implementor, "t-1"));
        let displaced = arena.insert(agent(Role::Implementor, "t-1"));
        assert!(displaced.is_some());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn remove_all_is_pipeline_ordered() {
        let mut arena = AgentArena::new();
        arena.insert(agent(Role::Merger, "t-1"));
        arena.insert(agent(Role::Implementor, "t-1"));
        arena.insert(agent(Role::Reviewer, "t-2"));

        let removed = arena.remove_all("t-1");
        let roles: Vec<Role> = removed.iter().map(|a| a.role()).collect();
        assert_eq!(roles, vec![Role::Implementor, Role::Merger]);
        assert_eq!(arena.len(), 1);
        assert!(arena.contains("t-2", Role::Reviewer));
    }

}
