//! Conversation history persistence seam
//!
//! The engine only assumes read-your-writes within a process lifetime.
//! Durable storage (and vector memory) is an external collaborator; the
//! in-memory store here is the default and the test implementation.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::protocol::{AgentId, Turn};

/// Append-only conversation history per agent
pub trait HistoryStore: Send + Sync {
    fn append(&self, agent: AgentId, turn: Turn);
    fn load(&self, agent: AgentId) -> Vec<Turn>;
    /// Drop an agent's history once it is retired
    fn forget(&self, agent: AgentId);
}

/// Process-local history store
pub struct MemoryStore {
    histories: RwLock<HashMap<AgentId, Vec<Turn>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { histories: RwLock::new(HashMap::new()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for MemoryStore {
    fn append(&self, agent: AgentId, turn: Turn) {
        self.histories.write().entry(agent).or_default().push(turn);
    }

    fn load(&self, agent: AgentId) -> Vec<Turn> {
        self.histories.read().get(&agent).cloned().unwrap_or_default()
    }

    fn forget(&self, agent: AgentId) {
        self.histories.write().remove(&agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_your_writes_in_order() {
        let store = MemoryStore::new();
        let agent = AgentId::new();
        store.append(agent, Turn::user("hello"));
        store.append(agent, Turn::assistant("hi"));

        let history = store.load(agent);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "hi");
    }

    #[test]
    fn test_histories_are_isolated_per_agent() {
        let store = MemoryStore::new();
        let a = AgentId::new();
        let b = AgentId::new();
        store.append(a, Turn::user("for a"));
        assert!(store.load(b).is_empty());
    }

    #[test]
    fn test_forget_clears() {
        let store = MemoryStore::new();
        let agent = AgentId::new();
        store.append(agent, Turn::user("x"));
        store.forget(agent);
        assert!(store.load(agent).is_empty());
    }
}
