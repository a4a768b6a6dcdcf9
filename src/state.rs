//! Per-agent state machine
//!
//! States are a flat enum; which transitions are legal depends on the
//! agent's role, encoded in [`transition_allowed`] as a lookup table so the
//! whole machine stays exhaustively checkable. Fault bookkeeping (resume
//! state, retry count) lives on the agent record, not in the enum.

use serde::{Deserialize, Serialize};

use crate::protocol::AgentRole;

/// Lifecycle state of an agent
///
/// `Idle` is both the initial state and the quiescent state between
/// episodes: a `Reporting` agent returns to `Idle` and is re-awakened by
/// the next message delivery. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Startup,
    Planning,
    /// ProjectManager only: decomposing the plan into tasks
    BuildingTeamTasks,
    /// Worker only: executing the assigned task
    Working,
    /// ProjectManager only: supervising workers until all tasks terminal
    Managing,
    /// Worker only: report delivered, pending manager review
    Waiting,
    Reporting,
    /// Direct reply, no delegation needed
    ConversationOnly,
    /// Recoverable fault; retries the originating state up to the budget
    Error,
    Failed,
}

impl AgentState {
    pub fn initial() -> Self {
        AgentState::Idle
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Failed)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Startup => "startup",
            AgentState::Planning => "planning",
            AgentState::BuildingTeamTasks => "building_team_tasks",
            AgentState::Working => "working",
            AgentState::Managing => "managing",
            AgentState::Waiting => "waiting",
            AgentState::Reporting => "reporting",
            AgentState::ConversationOnly => "conversation_only",
            AgentState::Error => "error",
            AgentState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Whether `from -> to` is a legal transition for `role`.
///
/// Self-transitions are legal everywhere except out of `Failed`
/// (`Managing` self-loops on every worker status update; the rest are
/// harmless no-ops). Any non-terminal state may enter `Error`, and `Error`
/// may resume any non-terminal state or escalate to `Failed`.
pub fn transition_allowed(role: AgentRole, from: AgentState, to: AgentState) -> bool {
    use AgentState::*;

    if from == Failed {
        return false;
    }
    if from == to {
        return true;
    }
    // Fault entry and recovery are role-independent.
    if to == Error {
        return true;
    }
    if from == Error {
        return to != Idle;
    }
    if to == Failed {
        return false; // only reachable through Error
    }

    match (from, to) {
        (Idle, Startup) => true,
        (Startup, Planning) => true,
        (Planning, BuildingTeamTasks) => role == AgentRole::ProjectManager,
        (Planning, Working) => role == AgentRole::Worker,
        (Planning, ConversationOnly) => role != AgentRole::Worker,
        // A Coordinator that produced a delegated plan reports immediately;
        // the final user-visible answer comes in a later episode.
        (Planning, Reporting) => role == AgentRole::Coordinator,
        (BuildingTeamTasks, Managing) => role == AgentRole::ProjectManager,
        (Managing, Reporting) => role == AgentRole::ProjectManager,
        (Working, Waiting) => role == AgentRole::Worker,
        (Waiting, Working) => role == AgentRole::Worker,
        (Waiting, Reporting) => role == AgentRole::Worker,
        (ConversationOnly, Reporting) => true,
        (Reporting, Idle) => true,
        _ => false,
    }
}

/// State a `Planning` agent of the given role moves to when its plan
/// requires delegation (`delegates = true`) or not.
pub fn after_planning(role: AgentRole, delegates: bool) -> AgentState {
    match (role, delegates) {
        (AgentRole::ProjectManager, _) => AgentState::BuildingTeamTasks,
        (AgentRole::Worker, _) => AgentState::Working,
        (AgentRole::Coordinator, true) => AgentState::Reporting,
        (_, false) | (AgentRole::Monitor, _) => AgentState::ConversationOnly,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentRole::*;
    use AgentState::*;

    const ALL_STATES: [AgentState; 11] = [
        Idle, Startup, Planning, BuildingTeamTasks, Working, Managing, Waiting, Reporting,
        ConversationOnly, Error, Failed,
    ];
    const ALL_ROLES: [AgentRole; 4] = [Coordinator, ProjectManager, Worker, Monitor];

    #[test]
    fn test_failed_is_terminal_for_every_role() {
        for role in ALL_ROLES {
            for to in ALL_STATES {
                assert!(!transition_allowed(role, Failed, to), "{role}: failed -> {to}");
            }
        }
    }

    #[test]
    fn test_every_live_state_may_fault() {
        for role in ALL_ROLES {
            for from in ALL_STATES {
                if from != Failed {
                    assert!(transition_allowed(role, from, Error), "{role}: {from} -> error");
                }
            }
        }
    }

    #[test]
    fn test_error_resumes_but_never_to_idle() {
        assert!(transition_allowed(Worker, Error, Working));
        assert!(transition_allowed(ProjectManager, Error, Managing));
        assert!(transition_allowed(Coordinator, Error, Failed));
        assert!(!transition_allowed(Worker, Error, Idle));
    }

    #[test]
    fn test_failed_only_reachable_through_error() {
        for role in ALL_ROLES {
            for from in ALL_STATES {
                if from != Error && from != Failed {
                    assert!(!transition_allowed(role, from, Failed), "{role}: {from} -> failed");
                }
            }
        }
    }

    #[test]
    fn test_manager_path() {
        assert!(transition_allowed(ProjectManager, Idle, Startup));
        assert!(transition_allowed(ProjectManager, Startup, Planning));
        assert!(transition_allowed(ProjectManager, Planning, BuildingTeamTasks));
        assert!(transition_allowed(ProjectManager, BuildingTeamTasks, Managing));
        assert!(transition_allowed(ProjectManager, Managing, Managing));
        assert!(transition_allowed(ProjectManager, Managing, Reporting));
        assert!(transition_allowed(ProjectManager, Reporting, Idle));
    }

    #[test]
    fn test_worker_path_including_revision() {
        assert!(transition_allowed(Worker, Planning, Working));
        assert!(transition_allowed(Worker, Working, Waiting));
        assert!(transition_allowed(Worker, Waiting, Working));
        assert!(transition_allowed(Worker, Waiting, Reporting));
        assert!(!transition_allowed(Worker, Planning, BuildingTeamTasks));
        assert!(!transition_allowed(Worker, Planning, ConversationOnly));
    }

    #[test]
    fn test_role_fencing() {
        assert!(!transition_allowed(Coordinator, Planning, Working));
        assert!(!transition_allowed(Coordinator, Planning, BuildingTeamTasks));
        assert!(!transition_allowed(Monitor, Planning, Reporting));
        assert!(!transition_allowed(ProjectManager, Planning, Reporting));
        assert!(transition_allowed(Coordinator, Planning, Reporting));
    }

    #[test]
    fn test_after_planning_table() {
        assert_eq!(after_planning(ProjectManager, true), BuildingTeamTasks);
        assert_eq!(after_planning(Worker, false), Working);
        assert_eq!(after_planning(Coordinator, true), Reporting);
        assert_eq!(after_planning(Coordinator, false), ConversationOnly);
        assert_eq!(after_planning(Monitor, false), ConversationOnly);
    }
}
