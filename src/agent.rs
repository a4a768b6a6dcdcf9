//! Agent record - one node in the hierarchy
//!
//! The agent itself is passive data: identity, role, state, kinship, an
//! inbox of undelivered turns, and fault bookkeeping. All mutation is
//! routed through the [`AgentManager`](crate::manager::AgentManager); no
//! other component touches these fields directly.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::protocol::{AgentId, AgentRole, TaskId, Turn};
use crate::state::AgentState;

/// Fault bookkeeping for an agent in `Error`
#[derive(Debug, Clone, Copy)]
pub struct FaultRecord {
    /// State to resume once remediation succeeds
    pub resume: AgentState,
}

/// A single agent in the hierarchy
pub struct Agent {
    /// Unique identifier
    pub id: AgentId,
    /// Role in the hierarchy
    pub role: AgentRole,
    /// Owning parent (absent only for the root Coordinator)
    pub parent: Option<AgentId>,
    /// Current lifecycle state
    state: RwLock<AgentState>,
    /// Turns delivered since the last cycle, not yet folded into history
    inbox: RwLock<Vec<Turn>>,
    /// Assigned task (Worker) or supervised project focus (ProjectManager)
    assignment: RwLock<Option<TaskId>>,
    /// Faults accumulated against the retry budget
    faults: RwLock<u32>,
    /// Present while the agent is in `Error`
    fault_record: RwLock<Option<FaultRecord>>,
    /// One pending remediation allowed per cycle
    remediated: RwLock<bool>,
}

impl Agent {
    pub(crate) fn new(id: AgentId, role: AgentRole, parent: Option<AgentId>) -> Self {
        info!(agent_id = %id, role = %role, parent = ?parent, "Creating agent");
        Self {
            id,
            role,
            parent,
            state: RwLock::new(AgentState::initial()),
            inbox: RwLock::new(Vec::new()),
            assignment: RwLock::new(None),
            faults: RwLock::new(0),
            fault_record: RwLock::new(None),
            remediated: RwLock::new(false),
        }
    }

    /// Current state
    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        *self.state.write() = state;
    }

    /// Queue a turn for the next cycle
    pub(crate) fn push_inbox(&self, turn: Turn) {
        self.inbox.write().push(turn);
    }

    /// Drain undelivered turns, in delivery order
    pub(crate) fn drain_inbox(&self) -> Vec<Turn> {
        std::mem::take(&mut *self.inbox.write())
    }

    pub(crate) fn inbox_len(&self) -> usize {
        self.inbox.read().len()
    }

    /// Task currently assigned to this agent
    pub fn assignment(&self) -> Option<TaskId> {
        *self.assignment.read()
    }

    pub(crate) fn assign(&self, task: Option<TaskId>) {
        *self.assignment.write() = task;
    }

    /// Faults accumulated so far
    pub fn faults(&self) -> u32 {
        *self.faults.read()
    }

    /// Record a fault; returns the new count
    pub(crate) fn record_fault(&self, resume: AgentState) -> u32 {
        let mut faults = self.faults.write();
        *faults += 1;
        *self.fault_record.write() = Some(FaultRecord { resume });
        *faults
    }

    /// Clear the fault record after a successful resume
    pub(crate) fn clear_fault(&self) -> Option<FaultRecord> {
        self.fault_record.write().take()
    }

    pub(crate) fn fault_record(&self) -> Option<FaultRecord> {
        *self.fault_record.read()
    }

    /// One remediation is allowed per cycle; returns false if it was
    /// already spent.
    pub(crate) fn take_remediation(&self) -> bool {
        let mut used = self.remediated.write();
        if *used {
            false
        } else {
            *used = true;
            true
        }
    }

    pub(crate) fn reset_remediation(&self) {
        *self.remediated.write() = false;
    }
}

/// Cheap, cloneable handle to an agent
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<Agent>,
}

impl AgentHandle {
    pub(crate) fn new(agent: Agent) -> Self {
        Self { inner: Arc::new(agent) }
    }

    pub fn id(&self) -> AgentId {
        self.inner.id
    }

    pub fn role(&self) -> AgentRole {
        self.inner.role
    }
}

impl std::ops::Deref for AgentHandle {
    type Target = Agent;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
