//! Engine - the embedding-facing entry point
//!
//! Wires the manager, workflow, and cycle handler together behind a
//! builder, accepts user requests, and drives the due set with a bounded
//! pool of concurrent cycle tasks. Cycles for distinct agents run in
//! parallel; cycles for one agent never overlap.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::channel::EngineChannel;
use crate::config::EngineConfig;
use crate::cycle::CycleHandler;
use crate::error::EngineError;
use crate::hierarchy::HierarchyTree;
use crate::manager::AgentManager;
use crate::monitor::{AllowAll, ComplianceMonitor};
use crate::protocol::{AgentId, AgentRole, ProjectId, Turn};
use crate::state::AgentState;
use crate::store::{HistoryStore, MemoryStore};
use crate::tools::{Tool, ToolRegistry};
use crate::workflow::WorkflowManager;

/// Hierarchical multi-agent engine
pub struct Engine {
    config: Arc<EngineConfig>,
    manager: Arc<AgentManager>,
    workflow: Arc<WorkflowManager>,
    handler: Arc<CycleHandler>,
    store: Arc<dyn HistoryStore>,
}

impl Engine {
    /// Start building an engine around a backend.
    pub fn builder(backend: Arc<dyn Backend>) -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            backend,
            monitor: Arc::new(AllowAll),
            store: Arc::new(MemoryStore::new()),
            registry: ToolRegistry::new(),
        }
    }

    /// Submit a user request. Opens a project and wakes the root
    /// Coordinator (creating it on first use, or replacing it after a
    /// fatal failure).
    pub fn submit(&self, request: impl Into<String>) -> Result<ProjectId, EngineError> {
        let request = request.into();
        let coordinator = self.ensure_coordinator()?;
        let project = self.workflow.create_project(request.clone());
        self.manager.deliver(coordinator, Turn::user(request))?;
        info!(project_id = %project, "Submitted request");
        Ok(project)
    }

    fn ensure_coordinator(&self) -> Result<AgentId, EngineError> {
        if let Some(root) = self.manager.root() {
            if root.state() != AgentState::Failed {
                return Ok(root.id);
            }
            // A failed Coordinator is replaced, not resumed. Its projects
            // were already closed when it failed; tear down what remains.
            warn!(agent_id = %root.id, "Replacing failed coordinator");
            for child in self.manager.descendants_depth_first(&root.id) {
                self.manager.retire(&child)?;
                self.store.forget(child);
            }
            self.manager.retire(&root.id)?;
            self.store.forget(root.id);
        }
        self.manager.create(AgentRole::Coordinator, None)
    }

    /// Drive cycles until no agent is due, running up to
    /// `max_concurrent_cycles` agents in parallel.
    pub async fn run_until_idle(&self) {
        let mut cycles: JoinSet<(AgentId, Result<(), EngineError>)> = JoinSet::new();
        loop {
            while cycles.len() < self.config.max_concurrent_cycles {
                let Some(id) = self.manager.claim_next() else { break };
                let handler = Arc::clone(&self.handler);
                cycles.spawn(async move { (id, handler.run_cycle(id).await) });
            }
            let Some(joined) = cycles.join_next().await else { break };
            match joined {
                Ok((id, result)) => {
                    self.manager.finish_cycle(id);
                    if let Err(err) = result {
                        self.handle_cycle_error(id, &err);
                    }
                }
                Err(join_err) => {
                    error!(error = %join_err, "Cycle task aborted");
                }
            }
        }
    }

    /// A cycle returned an error it could not absorb (an invariant such
    /// as an illegal transition): force the agent to `Failed` and let the
    /// workflow notify its parent.
    fn handle_cycle_error(&self, id: AgentId, err: &EngineError) {
        if !self.manager.contains(&id) {
            return;
        }
        error!(agent_id = %id, error = %err, "Cycle failed fatally");
        if let Err(fail_err) = self.manager.fail(id) {
            warn!(agent_id = %id, error = %fail_err, "Could not fail agent");
            return;
        }
        if let Err(wf_err) = self.workflow.on_agent_failed(&self.manager, id, &err.to_string()) {
            warn!(agent_id = %id, error = %wf_err, "Failure propagation incomplete");
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &AgentManager {
        &self.manager
    }

    pub fn workflow(&self) -> &WorkflowManager {
        &self.workflow
    }

    /// Snapshot of the live hierarchy with per-agent states
    pub fn tree(&self) -> Option<HierarchyTree> {
        self.manager.tree()
    }
}

/// Builder for [`Engine`]; only the backend is mandatory.
pub struct EngineBuilder {
    config: EngineConfig,
    backend: Arc<dyn Backend>,
    monitor: Arc<dyn ComplianceMonitor>,
    store: Arc<dyn HistoryStore>,
    registry: ToolRegistry,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn ComplianceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = store;
        self
    }

    /// Register an opaque tool available to every agent
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.registry = self.registry.register(tool);
        self
    }

    pub fn build(self) -> (Engine, EngineChannel) {
        let (notices, channel) = EngineChannel::pair();
        let config = Arc::new(self.config);
        let manager = Arc::new(AgentManager::new(config.clone(), notices.clone()));
        let workflow = Arc::new(WorkflowManager::new(
            config.clone(),
            self.store.clone(),
            notices.clone(),
        ));
        let handler = Arc::new(CycleHandler::new(
            config.clone(),
            manager.clone(),
            workflow.clone(),
            Arc::new(self.registry),
            self.backend,
            self.monitor,
            self.store.clone(),
            notices,
        ));
        let engine = Engine { config, manager, workflow, handler, store: self.store };
        (engine, channel)
    }
}
