//! Language-model backend seam
//!
//! The engine calls out with the conversation context and available tool
//! specs, and consumes back an ordered stream of [`AgentEvent`]s through
//! the bounded cycle channel. The real client (retries, transport,
//! streaming) lives outside this crate; [`ScriptedBackend`] is the
//! deterministic stand-in used by tests and demos.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::EventSink;
use crate::error::EngineError;
use crate::protocol::{AgentEvent, AgentId, AgentRole, Turn};
use crate::state::AgentState;
use crate::tools::ToolSpec;

/// Everything a backend sees for one cycle
#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub agent: AgentId,
    pub role: AgentRole,
    pub state: AgentState,
    /// Full conversation context: prior history plus newly delivered turns
    pub context: Vec<Turn>,
    pub tools: Vec<ToolSpec>,
}

/// Produces one cycle's worth of events for an agent
#[async_trait]
pub trait Backend: Send + Sync {
    /// Drive one invocation, emitting events in order through `events`.
    ///
    /// Returning `Err(EngineError::BackendUnavailable)` marks the whole
    /// cycle as a transient backend fault; emitting `ErrorRaised` events
    /// has the same effect per event. Either path is retried against the
    /// agent's budget.
    async fn invoke(&self, request: CycleRequest, events: EventSink) -> Result<(), EngineError>;
}

/// One cycle's scripted output
pub type ScriptBatch = Vec<AgentEvent>;

/// Deterministic backend driven by per-role scripts.
///
/// Each agent consumes its role's batches in order, one batch per cycle;
/// once a script is exhausted the last batch repeats (so a permanently
/// faulting script keeps faulting, and an answered script keeps
/// answering).
pub struct ScriptedBackend {
    scripts: HashMap<AgentRole, Vec<ScriptBatch>>,
    cursors: Mutex<HashMap<AgentId, usize>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self { scripts: HashMap::new(), cursors: Mutex::new(HashMap::new()) }
    }

    /// Script the successive cycles for every agent of `role`
    pub fn role(mut self, role: AgentRole, batches: Vec<ScriptBatch>) -> Self {
        assert!(!batches.is_empty(), "a role script needs at least one batch");
        self.scripts.insert(role, batches);
        self
    }

    fn next_batch(&self, agent: AgentId, role: AgentRole) -> Option<ScriptBatch> {
        let batches = self.scripts.get(&role)?;
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(agent).or_insert(0);
        let batch = batches[(*cursor).min(batches.len() - 1)].clone();
        *cursor += 1;
        Some(batch)
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn invoke(&self, request: CycleRequest, events: EventSink) -> Result<(), EngineError> {
        let batch = self.next_batch(request.agent, request.role).ok_or_else(|| {
            EngineError::MalformedOutput(format!("no script for role {}", request.role))
        })?;
        for event in batch {
            if events.emit(event).await.is_err() {
                // Consumer gone: the cycle was cancelled out from under us.
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Backend that is permanently down; every invocation is a transient fault
pub struct UnavailableBackend;

#[async_trait]
impl Backend for UnavailableBackend {
    async fn invoke(&self, _request: CycleRequest, _events: EventSink) -> Result<(), EngineError> {
        Err(EngineError::BackendUnavailable("backend offline".into()))
    }
}
