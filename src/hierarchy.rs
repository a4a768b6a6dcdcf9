//! Agent hierarchy - the parent/child tree
//!
//! Pure structure, no scheduling: nodes, edges, and the rules that keep
//! them consistent. The [`AgentManager`](crate::manager::AgentManager)
//! owns the single instance and is the only writer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::protocol::{AgentId, AgentRole};
use crate::state::AgentState;

#[derive(Debug, Clone)]
struct Node {
    role: AgentRole,
    parent: Option<AgentId>,
    children: Vec<AgentId>,
}

/// Snapshot of the live hierarchy for introspection/UI collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyTree {
    pub agent: AgentId,
    pub role: AgentRole,
    pub state: AgentState,
    pub children: Vec<HierarchyTree>,
}

/// The parent/child tree of live agents, rooted at the Coordinator
pub struct Hierarchy {
    nodes: HashMap<AgentId, Node>,
    root: Option<AgentId>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self { nodes: HashMap::new(), root: None }
    }

    /// Link an agent under `parent`. Rejected (unchanged tree) when the
    /// parent is missing, the parent's role cannot own this role, or a
    /// second root is attempted.
    pub fn add(
        &mut self,
        agent: AgentId,
        role: AgentRole,
        parent: Option<AgentId>,
    ) -> Result<(), EngineError> {
        match parent {
            None => {
                if let Some(root) = self.root {
                    return Err(EngineError::HierarchyViolation(format!(
                        "root already exists: {root}"
                    )));
                }
                if role != AgentRole::Coordinator {
                    return Err(EngineError::HierarchyViolation(format!(
                        "root must be a coordinator, got {role}"
                    )));
                }
                self.root = Some(agent);
            }
            Some(pid) => {
                let parent_node =
                    self.nodes.get(&pid).ok_or(EngineError::AgentNotFound(pid))?;
                if !parent_node.role.may_own(role) {
                    return Err(EngineError::HierarchyViolation(format!(
                        "{} agent {pid} cannot own a {role} child",
                        parent_node.role
                    )));
                }
                self.nodes.get_mut(&pid).unwrap().children.push(agent);
            }
        }

        self.nodes.insert(agent, Node { role, parent, children: Vec::new() });
        Ok(())
    }

    /// Unlink an agent. Rejected while it still has live children; a
    /// parent must retire its children first (never auto-cascaded).
    pub fn remove(&mut self, agent: &AgentId) -> Result<(), EngineError> {
        let node = self.nodes.get(agent).ok_or(EngineError::AgentNotFound(*agent))?;
        if !node.children.is_empty() {
            return Err(EngineError::HierarchyViolation(format!(
                "agent {agent} still owns {} live children",
                node.children.len()
            )));
        }

        let node = self.nodes.remove(agent).unwrap();
        if let Some(pid) = node.parent {
            if let Some(parent) = self.nodes.get_mut(&pid) {
                parent.children.retain(|id| id != agent);
            }
        }
        if self.root == Some(*agent) {
            self.root = None;
        }
        Ok(())
    }

    pub fn contains(&self, agent: &AgentId) -> bool {
        self.nodes.contains_key(agent)
    }

    pub fn root(&self) -> Option<AgentId> {
        self.root
    }

    pub fn parent(&self, agent: &AgentId) -> Option<AgentId> {
        self.nodes.get(agent).and_then(|n| n.parent)
    }

    pub fn children(&self, agent: &AgentId) -> Vec<AgentId> {
        self.nodes.get(agent).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn role(&self, agent: &AgentId) -> Option<AgentRole> {
        self.nodes.get(agent).map(|n| n.role)
    }

    /// Children of `agent`, deepest first, suitable for depth-first
    /// cancellation.
    pub fn descendants_depth_first(&self, agent: &AgentId) -> Vec<AgentId> {
        let mut out = Vec::new();
        for child in self.children(agent) {
            out.extend(self.descendants_depth_first(&child));
            out.push(child);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Verify mutual consistency of every parent pointer and child set.
    /// Invariant check used by tests after arbitrary operation sequences.
    pub fn check_consistency(&self) -> Result<(), EngineError> {
        for (id, node) in &self.nodes {
            if let Some(pid) = node.parent {
                let parent = self
                    .nodes
                    .get(&pid)
                    .ok_or_else(|| EngineError::HierarchyViolation(format!(
                        "agent {id} points at missing parent {pid}"
                    )))?;
                if !parent.children.contains(id) {
                    return Err(EngineError::HierarchyViolation(format!(
                        "parent {pid} does not list child {id}"
                    )));
                }
            } else if self.root != Some(*id) {
                return Err(EngineError::HierarchyViolation(format!(
                    "parentless agent {id} is not the root"
                )));
            }
            for child in &node.children {
                let child_node = self.nodes.get(child).ok_or_else(|| {
                    EngineError::HierarchyViolation(format!(
                        "agent {id} lists missing child {child}"
                    ))
                })?;
                if child_node.parent != Some(*id) {
                    return Err(EngineError::HierarchyViolation(format!(
                        "child {child} does not point back at {id}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Snapshot the tree from the root, resolving states through `state_of`.
    pub fn tree(&self, state_of: impl Fn(&AgentId) -> AgentState) -> Option<HierarchyTree> {
        self.root.map(|root| self.build_tree(root, &state_of))
    }

    fn build_tree(
        &self,
        agent: AgentId,
        state_of: &impl Fn(&AgentId) -> AgentState,
    ) -> HierarchyTree {
        let node = &self.nodes[&agent];
        HierarchyTree {
            agent,
            role: node.role,
            state: state_of(&agent),
            children: node
                .children
                .iter()
                .map(|child| self.build_tree(*child, state_of))
                .collect(),
        }
    }
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}
