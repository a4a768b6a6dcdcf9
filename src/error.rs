//! Engine error types

use thiserror::Error;

use crate::protocol::{AgentId, AgentRole, ProjectId, TaskId};
use crate::state::AgentState;

/// Errors that can occur in the orchestration engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Language-model backend unreachable or over capacity (transient)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A tool handler failed
    #[error("Tool '{name}' failed: {source}")]
    ToolExecutionFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Unknown tool name requested
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Programming invariant violation in the state machine (fatal)
    #[error("Invalid transition for {role} agent {agent}: {from} -> {to}")]
    InvalidTransition {
        agent: AgentId,
        role: AgentRole,
        from: AgentState,
        to: AgentState,
    },

    /// Structural rule of the hierarchy violated; never partially applied
    #[error("Hierarchy violation: {0}")]
    HierarchyViolation(String),

    /// Agent not present in the registry
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Task not present in the workflow registry
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Project not present in the workflow registry
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// Agent output the engine cannot interpret
    #[error("Malformed agent output: {0}")]
    MalformedOutput(String),
}
