pub mod arena;
pub mod engine;

pub use arena::AgentArena;
pub use engine::{Orchestrator, OrchestratorConfig, RunningAgent};
