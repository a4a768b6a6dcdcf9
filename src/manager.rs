//! Agent manager - authoritative registry and scheduler
//!
//! Owns agent existence, the hierarchy edges, and the due-for-cycle set.
//! Every mutation of hierarchy or per-agent state goes through this type;
//! the due/running/pending sets implement idempotent scheduling with
//! strict per-agent cycle serialization.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentHandle};
use crate::channel::NoticeSender;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::hierarchy::{Hierarchy, HierarchyTree};
use crate::protocol::{AgentId, AgentRole, Notice, Turn};
use crate::state::{transition_allowed, AgentState};

#[derive(Default)]
struct Sched {
    /// Agents due for a cycle, in schedule order
    queue: VecDeque<AgentId>,
    /// Membership mirror of `queue`
    queued: HashSet<AgentId>,
    /// Agents with a cycle currently in progress
    running: HashSet<AgentId>,
    /// Agents re-scheduled while running; queued again on finish
    pending: HashSet<AgentId>,
}

/// Registry of all live agents, their kinship, and the cycle schedule
pub struct AgentManager {
    agents: RwLock<HashMap<AgentId, AgentHandle>>,
    hierarchy: RwLock<Hierarchy>,
    sched: Mutex<Sched>,
    config: Arc<EngineConfig>,
    notices: NoticeSender,
}

impl AgentManager {
    pub(crate) fn new(config: Arc<EngineConfig>, notices: NoticeSender) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            hierarchy: RwLock::new(Hierarchy::new()),
            sched: Mutex::new(Sched::default()),
            config,
            notices,
        }
    }

    /// Create a new agent under `parent`.
    ///
    /// Fails with `HierarchyViolation` (nothing applied) when the parent
    /// is missing, its role cannot own children of `role`, or its child
    /// capacity is exhausted.
    pub fn create(
        &self,
        role: AgentRole,
        parent: Option<AgentId>,
    ) -> Result<AgentId, EngineError> {
        let id = AgentId::new();

        {
            let mut hierarchy = self.hierarchy.write();
            if let Some(pid) = parent {
                let limit = match hierarchy.role(&pid) {
                    Some(AgentRole::Coordinator) => self.config.max_projects,
                    Some(AgentRole::ProjectManager) => self.config.max_workers_per_manager,
                    _ => 0,
                };
                if hierarchy.children(&pid).len() >= limit && limit > 0 {
                    return Err(EngineError::HierarchyViolation(format!(
                        "agent {pid} is at its child capacity ({limit})"
                    )));
                }
            }
            hierarchy.add(id, role, parent)?;
        }

        let handle = AgentHandle::new(Agent::new(id, role, parent));
        self.agents.write().insert(id, handle);

        let _ = self.notices.send(Notice::AgentSpawned { agent: id, role, parent });
        Ok(id)
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentHandle> {
        self.agents.read().get(id).cloned()
    }

    pub fn require(&self, id: &AgentId) -> Result<AgentHandle, EngineError> {
        self.get(id).ok_or(EngineError::AgentNotFound(*id))
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.read().contains_key(id)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    /// The root Coordinator, if one exists
    pub fn root(&self) -> Option<AgentHandle> {
        let root = self.hierarchy.read().root()?;
        self.get(&root)
    }

    pub fn parent_of(&self, id: &AgentId) -> Option<AgentId> {
        self.hierarchy.read().parent(id)
    }

    pub fn children_of(&self, id: &AgentId) -> Vec<AgentId> {
        self.hierarchy.read().children(id)
    }

    /// Mark an agent due for a cycle. Idempotent: an agent already queued
    /// or running is not queued twice; a running agent is queued once more
    /// after its current cycle finishes.
    pub fn schedule(&self, id: AgentId) {
        if !self.contains(&id) {
            warn!(agent_id = %id, "Refusing to schedule unknown agent");
            return;
        }
        let mut sched = self.sched.lock();
        if sched.running.contains(&id) {
            sched.pending.insert(id);
            return;
        }
        if sched.queued.insert(id) {
            sched.queue.push_back(id);
            debug!(agent_id = %id, "Scheduled for cycle");
        }
    }

    /// Claim the next due agent for a cycle, moving it to the running set.
    pub(crate) fn claim_next(&self) -> Option<AgentId> {
        let mut sched = self.sched.lock();
        while let Some(id) = sched.queue.pop_front() {
            sched.queued.remove(&id);
            // May have been retired between scheduling and claiming.
            if self.agents.read().contains_key(&id) {
                sched.running.insert(id);
                return Some(id);
            }
        }
        None
    }

    /// Release a claimed agent; returns true if it was re-scheduled while
    /// running and is due again.
    pub(crate) fn finish_cycle(&self, id: AgentId) -> bool {
        let mut sched = self.sched.lock();
        sched.running.remove(&id);
        if sched.pending.remove(&id) && self.agents.read().contains_key(&id) {
            sched.queued.insert(id);
            sched.queue.push_back(id);
            return true;
        }
        false
    }

    /// Deliver a turn to an agent's inbox and schedule it.
    pub fn deliver(&self, id: AgentId, turn: Turn) -> Result<(), EngineError> {
        let agent = self.require(&id)?;
        agent.push_inbox(turn);
        self.schedule(id);
        Ok(())
    }

    /// Apply a state transition, validated against the role table.
    ///
    /// An illegal transition is a programming invariant violation: the
    /// error is returned and the caller is expected to `fail` the agent.
    pub fn transition(&self, id: AgentId, to: AgentState) -> Result<AgentState, EngineError> {
        let agent = self.require(&id)?;
        let from = agent.state();
        if !transition_allowed(agent.role, from, to) {
            return Err(EngineError::InvalidTransition { agent: id, role: agent.role, from, to });
        }
        agent.set_state(to);
        if from != to {
            debug!(agent_id = %id, %from, %to, "State transition");
            let _ = self.notices.send(Notice::AgentStateChanged { agent: id, from, to });
        }
        Ok(from)
    }

    /// Force an agent to `Failed` (through `Error`), emitting notices.
    pub fn fail(&self, id: AgentId) -> Result<(), EngineError> {
        let agent = self.require(&id)?;
        let from = agent.state();
        if from == AgentState::Failed {
            return Ok(());
        }
        if from != AgentState::Error {
            agent.set_state(AgentState::Error);
            let _ = self.notices.send(Notice::AgentStateChanged {
                agent: id,
                from,
                to: AgentState::Error,
            });
        }
        agent.set_state(AgentState::Failed);
        let _ = self.notices.send(Notice::AgentStateChanged {
            agent: id,
            from: AgentState::Error,
            to: AgentState::Failed,
        });
        info!(agent_id = %id, "Agent failed");
        Ok(())
    }

    /// Retire an agent, removing it from the registry and the schedule.
    ///
    /// Fails with `HierarchyViolation` while the agent has live children:
    /// a parent must retire all children first. Never auto-cascades.
    pub fn retire(&self, id: &AgentId) -> Result<(), EngineError> {
        // Hierarchy removal is the gate; nothing else is touched on error.
        self.hierarchy.write().remove(id)?;
        self.agents.write().remove(id);

        let mut sched = self.sched.lock();
        if sched.queued.remove(id) {
            sched.queue.retain(|queued| queued != id);
        }
        sched.pending.remove(id);
        // A running cycle observes retirement at its next suspension point.
        drop(sched);

        info!(agent_id = %id, "Retired agent");
        let _ = self.notices.send(Notice::AgentRetired { agent: *id });
        Ok(())
    }

    /// Live descendants of `id`, deepest first (cancellation order)
    pub fn descendants_depth_first(&self, id: &AgentId) -> Vec<AgentId> {
        self.hierarchy.read().descendants_depth_first(id)
    }

    /// Snapshot of the hierarchy with live states
    pub fn tree(&self) -> Option<HierarchyTree> {
        let agents = self.agents.read();
        self.hierarchy.read().tree(|id| {
            agents.get(id).map(|a| a.state()).unwrap_or(AgentState::Failed)
        })
    }

    /// Invariant check used by tests: edges mutually consistent and every
    /// registered agent present in the hierarchy (and vice versa).
    pub fn check_consistency(&self) -> Result<(), EngineError> {
        let hierarchy = self.hierarchy.read();
        hierarchy.check_consistency()?;
        let agents = self.agents.read();
        if agents.len() != hierarchy.len() {
            return Err(EngineError::HierarchyViolation(format!(
                "registry has {} agents but hierarchy has {} nodes",
                agents.len(),
                hierarchy.len()
            )));
        }
        for id in agents.keys() {
            if !hierarchy.contains(id) {
                return Err(EngineError::HierarchyViolation(format!(
                    "agent {id} registered but absent from hierarchy"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EngineChannel;

    fn manager() -> (AgentManager, EngineChannel) {
        let (tx, rx) = EngineChannel::pair();
        (AgentManager::new(Arc::new(EngineConfig::for_tests()), tx), rx)
    }

    fn three_tier(m: &AgentManager) -> (AgentId, AgentId, AgentId) {
        let root = m.create(AgentRole::Coordinator, None).unwrap();
        let pm = m.create(AgentRole::ProjectManager, Some(root)).unwrap();
        let worker = m.create(AgentRole::Worker, Some(pm)).unwrap();
        (root, pm, worker)
    }

    #[test]
    fn test_create_links_hierarchy_and_registry() {
        let (m, mut channel) = manager();
        let (root, pm, worker) = three_tier(&m);

        assert_eq!(m.agent_count(), 3);
        assert_eq!(m.parent_of(&worker), Some(pm));
        assert_eq!(m.children_of(&root), vec![pm]);
        m.check_consistency().unwrap();

        let spawns = channel
            .drain()
            .into_iter()
            .filter(|n| matches!(n, Notice::AgentSpawned { .. }))
            .count();
        assert_eq!(spawns, 3);
    }

    #[test]
    fn test_worker_cannot_spawn() {
        let (m, _channel) = manager();
        let (_, _, worker) = three_tier(&m);
        let err = m.create(AgentRole::Worker, Some(worker));
        assert!(matches!(err, Err(EngineError::HierarchyViolation(_))));
        assert_eq!(m.agent_count(), 3);
        m.check_consistency().unwrap();
    }

    #[test]
    fn test_create_with_missing_parent_fails() {
        let (m, _channel) = manager();
        let err = m.create(AgentRole::Worker, Some(AgentId::new()));
        assert!(matches!(err, Err(EngineError::AgentNotFound(_))));
        assert_eq!(m.agent_count(), 0);
    }

    #[test]
    fn test_child_capacity_enforced() {
        let (tx, _rx) = EngineChannel::pair();
        let config = EngineConfig { max_projects: 1, ..EngineConfig::for_tests() };
        let m = AgentManager::new(Arc::new(config), tx);
        let root = m.create(AgentRole::Coordinator, None).unwrap();
        m.create(AgentRole::ProjectManager, Some(root)).unwrap();
        let err = m.create(AgentRole::ProjectManager, Some(root));
        assert!(matches!(err, Err(EngineError::HierarchyViolation(_))));
    }

    #[test]
    fn test_scheduling_is_idempotent() {
        let (m, _channel) = manager();
        let (root, ..) = three_tier(&m);

        m.schedule(root);
        m.schedule(root);
        m.schedule(root);

        assert_eq!(m.claim_next(), Some(root));
        // Only one queued entry existed.
        assert_eq!(m.claim_next(), None);
        assert!(!m.finish_cycle(root));
    }

    #[test]
    fn test_schedule_while_running_queues_exactly_one_followup() {
        let (m, _channel) = manager();
        let (root, ..) = three_tier(&m);

        m.schedule(root);
        assert_eq!(m.claim_next(), Some(root));

        m.schedule(root);
        m.schedule(root);
        assert_eq!(m.claim_next(), None); // serialized: nothing claimable mid-cycle

        assert!(m.finish_cycle(root));
        assert_eq!(m.claim_next(), Some(root));
        assert!(!m.finish_cycle(root));
    }

    #[test]
    fn test_retire_with_live_children_fails_unchanged() {
        let (m, _channel) = manager();
        let (_, pm, worker) = three_tier(&m);

        let err = m.retire(&pm);
        assert!(matches!(err, Err(EngineError::HierarchyViolation(_))));
        assert!(m.contains(&pm));
        assert!(m.contains(&worker));
        m.check_consistency().unwrap();
    }

    #[test]
    fn test_retire_discards_due_entry() {
        let (m, _channel) = manager();
        let (_, _, worker) = three_tier(&m);

        m.schedule(worker);
        m.retire(&worker).unwrap();
        assert_eq!(m.claim_next(), None);
        m.check_consistency().unwrap();
    }

    #[test]
    fn test_transition_validates_against_role_table() {
        let (m, _channel) = manager();
        let (root, ..) = three_tier(&m);

        m.transition(root, AgentState::Startup).unwrap();
        m.transition(root, AgentState::Planning).unwrap();
        let err = m.transition(root, AgentState::Working);
        assert!(matches!(err, Err(EngineError::InvalidTransition { .. })));
        // State untouched by the rejected transition.
        assert_eq!(m.get(&root).unwrap().state(), AgentState::Planning);
    }

    #[test]
    fn test_fail_reaches_failed_through_error() {
        let (m, mut channel) = manager();
        let (_, _, worker) = three_tier(&m);

        m.fail(worker).unwrap();
        assert_eq!(m.get(&worker).unwrap().state(), AgentState::Failed);

        let states: Vec<_> = channel
            .drain()
            .into_iter()
            .filter_map(|n| match n {
                Notice::AgentStateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![AgentState::Error, AgentState::Failed]);
    }

    #[test]
    fn test_deliver_queues_and_schedules() {
        let (m, _channel) = manager();
        let (root, ..) = three_tier(&m);

        m.deliver(root, Turn::user("hello")).unwrap();
        assert_eq!(m.get(&root).unwrap().inbox_len(), 1);
        assert_eq!(m.claim_next(), Some(root));
    }

    #[test]
    fn test_descendants_order_workers_before_manager() {
        let (m, _channel) = manager();
        let (root, pm, worker) = three_tier(&m);
        let order = m.descendants_depth_first(&root);
        let pm_pos = order.iter().position(|id| *id == pm).unwrap();
        let w_pos = order.iter().position(|id| *id == worker).unwrap();
        assert!(w_pos < pm_pos);
    }
}
