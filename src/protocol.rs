//! Protocol types shared across the engine
//!
//! Everything that crosses a component boundary lives here: identifiers,
//! roles, conversation turns, the per-cycle agent event stream, compliance
//! verdicts, and the task/project records the workflow layer owns.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Unique identifier for an agent
    AgentId
);
id_type!(
    /// Unique identifier for a task
    TaskId
);
id_type!(
    /// Unique identifier for a project
    ProjectId
);
id_type!(
    /// Unique identifier for a single tool invocation
    CallId
);

/// Role of an agent in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Root agent: receives user requests, produces the final response
    Coordinator,
    /// Mid-tier agent: decomposes a plan into tasks, supervises workers
    ProjectManager,
    /// Leaf agent: executes exactly one assigned task
    Worker,
    /// Independent policy checker; never owns children
    Monitor,
}

impl AgentRole {
    /// Roles this role may own as children
    pub fn may_own(&self, child: AgentRole) -> bool {
        match self {
            AgentRole::Coordinator => matches!(
                child,
                AgentRole::ProjectManager | AgentRole::Worker | AgentRole::Monitor
            ),
            AgentRole::ProjectManager => matches!(child, AgentRole::Worker),
            AgentRole::Worker | AgentRole::Monitor => false,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::ProjectManager => "project_manager",
            AgentRole::Worker => "worker",
            AgentRole::Monitor => "monitor",
        };
        f.write_str(s)
    }
}

/// Who authored a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One record in an agent's conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: TurnRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into() }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Tool, content: content.into() }
    }
}

/// Fault classification used by `AgentEvent::ErrorRaised` and the retry
/// machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Transient backend outage; retried with backoff up to the budget
    BackendUnavailable,
    /// A tool handler returned an error; retried once with context
    ToolExecutionFailed,
    /// The compliance monitor blocked the output; never retried verbatim
    PolicyViolation,
    /// The agent produced output the engine cannot interpret
    MalformedOutput,
}

/// Event produced by one agent invocation, consumed exactly once by the
/// cycle handler in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Intermediate reasoning; forwarded to observers, no state change
    ThoughtEmitted { text: String },
    /// Request to execute a named tool with JSON arguments
    ToolRequested { call_id: CallId, name: String, arguments: Value },
    /// Terminal answer for this cycle; at most one per cycle
    FinalResponse { text: String },
    /// Fault surfaced by the agent or its backend
    ErrorRaised { kind: FaultKind, detail: String },
}

/// Verdict from the compliance monitor on a proposed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Apply the side effect as proposed
    Allow,
    /// Do not apply; re-invoke the agent with this guidance appended
    Remediate { guidance: String },
    /// Terminate the cycle as a policy violation
    Block { reason: String },
}

/// Content submitted to the compliance monitor for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Proposal {
    Response { text: String },
    ToolCall { name: String, arguments: Value },
}

/// Status of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A unit of work created by a ProjectManager during decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub project: ProjectId,
    pub status: TaskStatus,
    /// Worker assigned to this task; absent until status is `Assigned`
    pub assignee: Option<AgentId>,
    /// Accepted result text, present once `Completed`
    pub result: Option<String>,
}

/// Aggregate status of a project, derived from its tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Created but not yet delegated to a manager
    Pending,
    /// Delegated; at least one task not yet terminal
    Active,
    /// All tasks completed and the manager's summary accepted
    Completed,
    /// A task exhausted retries, or the managing agent failed
    Failed,
}

impl ProjectStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Failed)
    }
}

/// A user request delegated through the hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Originating request text
    pub request: String,
    /// ProjectManager supervising this project, once delegated
    pub manager: Option<AgentId>,
    /// Tasks in decomposition order
    pub tasks: Vec<TaskId>,
    pub status: ProjectStatus,
    /// Final aggregated answer, present once terminal
    pub outcome: Option<String>,
}

/// Engine-level notification surfaced to the embedding process
/// (observability sink and human-facing delivery, per the transport seam).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    AgentSpawned { agent: AgentId, role: AgentRole, parent: Option<AgentId> },
    AgentStateChanged { agent: AgentId, from: crate::state::AgentState, to: crate::state::AgentState },
    AgentRetired { agent: AgentId },
    Thought { agent: AgentId, text: String },
    FinalResponse { agent: AgentId, text: String },
    TaskStatusChanged { task: TaskId, status: TaskStatus },
    ProjectStatusChanged { project: ProjectId, status: ProjectStatus },
    /// User-visible answer for a submitted request
    ProjectOutcome { project: ProjectId, status: ProjectStatus, text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_uniqueness() {
        assert_ne!(AgentId::new(), AgentId::new());
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_role_ownership_rules() {
        assert!(AgentRole::Coordinator.may_own(AgentRole::ProjectManager));
        assert!(AgentRole::ProjectManager.may_own(AgentRole::Worker));
        assert!(!AgentRole::Worker.may_own(AgentRole::Worker));
        assert!(!AgentRole::Monitor.may_own(AgentRole::Worker));
        assert!(!AgentRole::ProjectManager.may_own(AgentRole::ProjectManager));
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = AgentEvent::ToolRequested {
            call_id: CallId::new(),
            name: "route_message".into(),
            arguments: serde_json::json!({"to": "someone", "body": "hi"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_task_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }
}
