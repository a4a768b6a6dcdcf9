//! Agent cycle handler
//!
//! Drives exactly one invocation of a due agent to completion and turns
//! its ordered event stream into side effects: state transitions, tool
//! execution, message routing, and workflow reactions. Cycles for one
//! agent are strictly serialized by the manager's running set; this type
//! only ever sees an agent it has exclusively claimed.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::agent::AgentHandle;
use crate::backend::{Backend, CycleRequest};
use crate::channel::{cycle_channel, NoticeSender};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::manager::AgentManager;
use crate::monitor::ComplianceMonitor;
use crate::protocol::{AgentEvent, AgentId, AgentRole, CallId, FaultKind, Notice, Proposal, Turn, Verdict};
use crate::state::AgentState;
use crate::store::HistoryStore;
use crate::tools::{ToolContext, ToolRegistry};
use crate::workflow::WorkflowManager;

/// Role-specific system context, loaded once at `Startup`
fn role_context(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Coordinator => {
            "You are the coordinator. Decompose user requests into a plan with \
             submit_plan and delegate, or answer directly."
        }
        AgentRole::ProjectManager => {
            "You are a project manager. Decompose your delegated plan into tasks \
             with submit_plan, supervise your workers, then report an aggregate \
             summary."
        }
        AgentRole::Worker => {
            "You are a worker. Complete your assigned task and report the result."
        }
        AgentRole::Monitor => "You are a compliance monitor.",
    }
}

/// How one tool execution left the cycle
enum ToolFlow {
    /// Executed (or rejected at a boundary); `followup` marks results the
    /// agent needs another turn to act on
    Done { followup: bool },
    /// Unrecoverable failure, surfaces through the fault path
    Fault { kind: FaultKind, detail: String },
}

/// Consumes an agent's event channel and applies side effects in order
pub struct CycleHandler {
    config: Arc<EngineConfig>,
    manager: Arc<AgentManager>,
    workflow: Arc<WorkflowManager>,
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn Backend>,
    monitor: Arc<dyn ComplianceMonitor>,
    store: Arc<dyn HistoryStore>,
    notices: NoticeSender,
}

impl CycleHandler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        manager: Arc<AgentManager>,
        workflow: Arc<WorkflowManager>,
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn Backend>,
        monitor: Arc<dyn ComplianceMonitor>,
        store: Arc<dyn HistoryStore>,
        notices: NoticeSender,
    ) -> Self {
        Self { config, manager, workflow, registry, backend, monitor, store, notices }
    }

    /// Run one full cycle for a claimed agent.
    #[instrument(skip(self), fields(agent_id = %id))]
    pub async fn run_cycle(&self, id: AgentId) -> Result<(), EngineError> {
        let Some(agent) = self.manager.get(&id) else {
            // Retired between scheduling and claiming.
            return Ok(());
        };
        if agent.state() == AgentState::Failed {
            return Ok(());
        }
        agent.reset_remediation();

        self.pre_cycle(&agent)?;

        // Fold newly delivered turns into the persisted context.
        for turn in agent.drain_inbox() {
            self.store.append(id, turn);
        }

        let request = CycleRequest {
            agent: id,
            role: agent.role,
            state: agent.state(),
            context: self.store.load(id),
            tools: self.registry.specs(),
        };
        let (sink, mut stream) = cycle_channel(self.config.event_channel_capacity);
        let backend = Arc::clone(&self.backend);
        let producer = tokio::spawn(async move { backend.invoke(request, sink).await });

        let mut saw_final = false;
        let mut needs_followup = false;
        let mut remediated = false;
        let mut fault: Option<(FaultKind, String)> = None;
        let mut blocked: Option<String> = None;

        while let Some(event) = stream.next().await {
            if !self.manager.contains(&id) {
                // Retired mid-cycle: abandon remaining side effects.
                producer.abort();
                return Ok(());
            }
            match event {
                AgentEvent::ThoughtEmitted { text } => {
                    debug!(agent_id = %id, "Thought emitted");
                    let _ = self.notices.send(Notice::Thought { agent: id, text });
                }
                AgentEvent::ToolRequested { call_id, name, arguments } => {
                    let proposal =
                        Proposal::ToolCall { name: name.clone(), arguments: arguments.clone() };
                    match self.monitor.review(id, agent.role, &proposal) {
                        Verdict::Block { reason } => {
                            blocked = Some(reason);
                            break;
                        }
                        Verdict::Remediate { guidance } => {
                            if self.apply_remediation(&agent, &guidance) {
                                remediated = true;
                            } else {
                                blocked = Some("remediation budget exhausted".into());
                            }
                            break;
                        }
                        Verdict::Allow => {
                            match self.execute_tool(&agent, call_id, &name, arguments).await {
                                ToolFlow::Done { followup } => needs_followup |= followup,
                                ToolFlow::Fault { kind, detail } => {
                                    fault = Some((kind, detail));
                                    break;
                                }
                            }
                        }
                    }
                }
                AgentEvent::FinalResponse { text } => {
                    if saw_final {
                        fault = Some((
                            FaultKind::MalformedOutput,
                            "second FinalResponse within one cycle".into(),
                        ));
                        break;
                    }
                    let proposal = Proposal::Response { text: text.clone() };
                    match self.monitor.review(id, agent.role, &proposal) {
                        Verdict::Block { reason } => {
                            blocked = Some(reason);
                            break;
                        }
                        Verdict::Remediate { guidance } => {
                            if self.apply_remediation(&agent, &guidance) {
                                remediated = true;
                            } else {
                                blocked = Some("remediation budget exhausted".into());
                            }
                            break;
                        }
                        Verdict::Allow => {
                            saw_final = true;
                            self.store.append(id, Turn::assistant(text.clone()));
                            let _ = self
                                .notices
                                .send(Notice::FinalResponse { agent: id, text: text.clone() });
                            self.apply_final(&agent, &text)?;
                        }
                    }
                }
                AgentEvent::ErrorRaised { kind, detail } => {
                    fault = Some((kind, detail));
                    break;
                }
            }
        }
        drop(stream);

        // Collect transient backend failure if the stream ended without a
        // fault of its own.
        match producer.await {
            Ok(Ok(())) => {}
            Ok(Err(EngineError::BackendUnavailable(detail))) => {
                if fault.is_none() && blocked.is_none() && !saw_final && !remediated {
                    fault = Some((FaultKind::BackendUnavailable, detail));
                }
            }
            Ok(Err(err)) => {
                if fault.is_none() && blocked.is_none() {
                    fault = Some((FaultKind::MalformedOutput, err.to_string()));
                }
            }
            Err(join_err) => {
                if !join_err.is_cancelled() && fault.is_none() {
                    fault = Some((FaultKind::MalformedOutput, join_err.to_string()));
                }
            }
        }

        if !self.manager.contains(&id) {
            return Ok(());
        }
        if let Some(reason) = blocked {
            return self.apply_policy_block(&agent, &reason);
        }
        if remediated {
            // Re-invoke with the guidance appended; no side effect applied.
            self.manager.schedule(id);
            return Ok(());
        }
        if let Some((kind, detail)) = fault {
            return self.apply_fault(&agent, kind, &detail).await;
        }

        // A ProjectManager that submitted its decomposition builds the team
        // now, before anything else can observe it in Planning.
        if agent.role == AgentRole::ProjectManager
            && !saw_final
            && agent.state() == AgentState::Planning
            && self.workflow.has_plan(&id)
        {
            self.manager.transition(id, AgentState::BuildingTeamTasks)?;
            self.workflow.on_manager_building(&self.manager, id)?;
        }

        if !saw_final && needs_followup {
            // Tool results landed in context; the agent owes another turn.
            self.manager.schedule(id);
        }
        Ok(())
    }

    /// Transitions applied before the backend is invoked: wake-up through
    /// Planning (and straight to Working for a Worker), or resume from a
    /// recoverable fault.
    fn pre_cycle(&self, agent: &AgentHandle) -> Result<(), EngineError> {
        let id = agent.id;
        match agent.state() {
            AgentState::Idle => {
                self.manager.transition(id, AgentState::Startup)?;
                if self.store.load(id).is_empty() {
                    self.store.append(id, Turn::system(role_context(agent.role)));
                }
                self.manager.transition(id, AgentState::Planning)?;
                if agent.role == AgentRole::Worker {
                    self.manager.transition(id, AgentState::Working)?;
                    self.workflow.on_worker_working(agent);
                }
            }
            AgentState::Error => {
                let resume = agent
                    .clear_fault()
                    .map(|f| f.resume)
                    .unwrap_or(AgentState::Planning);
                self.manager.transition(id, resume)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_remediation(&self, agent: &AgentHandle, guidance: &str) -> bool {
        if !agent.take_remediation() {
            return false;
        }
        info!(agent_id = %agent.id, "Output remediated by monitor");
        self.store.append(agent.id, Turn::user(format!("[monitor] {guidance}")));
        true
    }

    /// Execute one allowed tool request. The two load-bearing tools and
    /// the workflow's structured tools are intercepted here; everything
    /// else goes through the registry with one retry.
    async fn execute_tool(
        &self,
        agent: &AgentHandle,
        call_id: CallId,
        name: &str,
        arguments: Value,
    ) -> ToolFlow {
        let id = agent.id;
        match name {
            "spawn_agent" => {
                let outcome = self.spawn_agent(agent, &arguments);
                match outcome {
                    Ok(child) => {
                        self.append_tool_result(id, call_id, name, json!({ "agent_id": child }));
                        ToolFlow::Done { followup: true }
                    }
                    Err(err) => {
                        // Rejected at the manager boundary; never a fault.
                        self.append_tool_failure(id, call_id, name, &err.to_string());
                        ToolFlow::Done { followup: true }
                    }
                }
            }
            "route_message" => match self.route_message(agent, &arguments) {
                Ok(target) => {
                    self.append_tool_result(id, call_id, name, json!({ "delivered_to": target }));
                    ToolFlow::Done { followup: true }
                }
                Err(err) => {
                    self.append_tool_failure(id, call_id, name, &err.to_string());
                    ToolFlow::Done { followup: true }
                }
            },
            _ => {
                if let Some(result) =
                    self.workflow.handle_tool(&self.manager, agent, name, &arguments)
                {
                    match result {
                        Ok(value) => self.append_tool_result(id, call_id, name, value),
                        Err(err) => self.append_tool_failure(id, call_id, name, &err.to_string()),
                    }
                    // A Coordinator acts on the acknowledgement in its next
                    // turn; a ProjectManager's plan takes effect within this
                    // cycle when it moves to BuildingTeamTasks, and report
                    // reviews re-schedule through delivery.
                    let followup = agent.role == AgentRole::Coordinator;
                    return ToolFlow::Done { followup };
                }
                self.execute_registry_tool(agent, call_id, name, arguments).await
            }
        }
    }

    fn spawn_agent(&self, agent: &AgentHandle, arguments: &Value) -> Result<AgentId, EngineError> {
        let role: AgentRole = arguments
            .get("role")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| EngineError::MalformedOutput("spawn_agent needs a role".into()))?;
        let child = self.manager.create(role, Some(agent.id))?;
        if let Some(task) = arguments.get("task").and_then(Value::as_str) {
            self.manager.deliver(child, Turn::user(format!("Task: {task}")))?;
        }
        info!(agent_id = %agent.id, child_id = %child, role = %role, "Agent spawned child");
        Ok(child)
    }

    fn route_message(&self, agent: &AgentHandle, arguments: &Value) -> Result<AgentId, EngineError> {
        let to: AgentId = arguments
            .get("to")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| EngineError::MalformedOutput("route_message needs a target".into()))?;
        let body = arguments.get("body").and_then(Value::as_str).unwrap_or_default();
        self.manager.deliver(to, Turn::user(format!("[from {}] {body}", agent.id)))?;
        Ok(to)
    }

    async fn execute_registry_tool(
        &self,
        agent: &AgentHandle,
        call_id: CallId,
        name: &str,
        arguments: Value,
    ) -> ToolFlow {
        let Some(tool) = self.registry.get(name) else {
            let err = EngineError::UnknownTool(name.to_string());
            self.append_tool_failure(agent.id, call_id, name, &err.to_string());
            return ToolFlow::Done { followup: true };
        };
        let ctx = ToolContext { agent: agent.id, role: agent.role, task: agent.assignment() };

        let attempts = 1 + self.config.tool_retry;
        let mut last_error = anyhow::anyhow!("tool never invoked");
        for attempt in 1..=attempts {
            match tool.call(&ctx, arguments.clone()).await {
                Ok(value) => {
                    self.append_tool_result(agent.id, call_id, name, value);
                    return ToolFlow::Done { followup: true };
                }
                Err(err) => {
                    warn!(agent_id = %agent.id, tool = name, attempt, error = %err, "Tool failed");
                    // Failure lands in context before any retry.
                    self.append_tool_failure(agent.id, call_id, name, &err.to_string());
                    last_error = err;
                }
            }
        }
        let err = EngineError::ToolExecutionFailed { name: name.to_string(), source: last_error };
        ToolFlow::Fault { kind: FaultKind::ToolExecutionFailed, detail: err.to_string() }
    }

    fn append_tool_result(&self, id: AgentId, call_id: CallId, name: &str, result: Value) {
        self.store.append(
            id,
            Turn::tool(json!({ "call": call_id, "tool": name, "result": result }).to_string()),
        );
    }

    fn append_tool_failure(&self, id: AgentId, call_id: CallId, name: &str, error: &str) {
        self.store.append(
            id,
            Turn::tool(json!({ "call": call_id, "tool": name, "error": error }).to_string()),
        );
    }

    /// Apply the state transitions a FinalResponse triggers for this role,
    /// then hand the text to the workflow's reaction hooks.
    fn apply_final(&self, agent: &AgentHandle, text: &str) -> Result<(), EngineError> {
        let id = agent.id;
        match agent.role {
            AgentRole::Worker => match agent.state() {
                AgentState::Working => {
                    self.manager.transition(id, AgentState::Waiting)?;
                    self.workflow.on_worker_waiting(&self.manager, agent, text)?;
                }
                state => {
                    warn!(agent_id = %id, %state, "Worker final response in unexpected state");
                }
            },
            AgentRole::ProjectManager => match agent.state() {
                AgentState::Managing => {
                    self.manager.transition(id, AgentState::Reporting)?;
                    self.workflow.on_manager_reporting(&self.manager, id, text)?;
                }
                AgentState::Planning => {
                    // No decomposition: a direct conversational reply.
                    self.manager.transition(id, AgentState::ConversationOnly)?;
                    self.manager.transition(id, AgentState::Reporting)?;
                    self.workflow.on_manager_reporting(&self.manager, id, text)?;
                }
                state => {
                    warn!(agent_id = %id, %state, "Manager final response in unexpected state");
                }
            },
            AgentRole::Coordinator => {
                if agent.state() == AgentState::Planning {
                    if self.workflow.has_plan(&id) {
                        self.manager.transition(id, AgentState::Reporting)?;
                    } else {
                        self.manager.transition(id, AgentState::ConversationOnly)?;
                        self.manager.transition(id, AgentState::Reporting)?;
                    }
                }
                self.workflow.on_coordinator_reporting(&self.manager, id, text)?;
                if self.manager.contains(&id) {
                    self.manager.transition(id, AgentState::Idle)?;
                }
            }
            AgentRole::Monitor => {
                if agent.state() == AgentState::Planning {
                    self.manager.transition(id, AgentState::ConversationOnly)?;
                }
                self.manager.transition(id, AgentState::Reporting)?;
                self.manager.transition(id, AgentState::Idle)?;
            }
        }
        // A manager that reported without a supervised project is not
        // retired by the workflow; settle it back to Idle.
        if agent.role == AgentRole::ProjectManager
            && self.manager.contains(&id)
            && agent.state() == AgentState::Reporting
        {
            self.manager.transition(id, AgentState::Idle)?;
        }
        Ok(())
    }

    /// Fault path: enter `Error`, then either retry the originating state
    /// (with backoff) or exhaust the budget and fail, notifying the parent
    /// through the workflow.
    async fn apply_fault(
        &self,
        agent: &AgentHandle,
        kind: FaultKind,
        detail: &str,
    ) -> Result<(), EngineError> {
        let id = agent.id;
        let resume = match agent.state() {
            AgentState::Error => {
                agent.fault_record().map(|f| f.resume).unwrap_or(AgentState::Planning)
            }
            // Error never resumes to Idle; a fault after the episode
            // concluded restarts at Planning.
            AgentState::Idle => AgentState::Planning,
            state => state,
        };
        let count = agent.record_fault(resume);
        if agent.state() != AgentState::Error {
            self.manager.transition(id, AgentState::Error)?;
        }
        warn!(agent_id = %id, ?kind, faults = count, detail, "Cycle fault");

        if count >= self.config.retry_budget {
            self.manager.fail(id)?;
            self.workflow.on_agent_failed(&self.manager, id, detail)?;
            return Ok(());
        }

        let backoff = self.config.backoff_for(count);
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }
        self.manager.schedule(id);
        Ok(())
    }

    /// Policy block: the cycle ends in `Error` with no side effects
    /// applied, and the violation is surfaced to the parent. Never
    /// retried verbatim.
    fn apply_policy_block(&self, agent: &AgentHandle, reason: &str) -> Result<(), EngineError> {
        let id = agent.id;
        warn!(agent_id = %id, reason, "Output blocked by policy");
        agent.record_fault(agent.state());
        if agent.state() != AgentState::Error {
            self.manager.transition(id, AgentState::Error)?;
        }
        self.workflow.on_policy_blocked(&self.manager, id, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::channel::EngineChannel;
    use crate::monitor::{AllowAll, DenyList};
    use crate::store::MemoryStore;
    use crate::tools::test_tools::{EchoTool, FlakyTool};
    use crate::tools::Tool;
    use parking_lot::Mutex;

    struct Harness {
        manager: Arc<AgentManager>,
        workflow: Arc<WorkflowManager>,
        handler: CycleHandler,
        store: Arc<MemoryStore>,
        channel: EngineChannel,
    }

    fn harness_with(
        backend: Arc<dyn Backend>,
        monitor: Arc<dyn ComplianceMonitor>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Harness {
        let (tx, channel) = EngineChannel::pair();
        let config = Arc::new(EngineConfig::for_tests());
        let manager = Arc::new(AgentManager::new(config.clone(), tx.clone()));
        let store = Arc::new(MemoryStore::new());
        let workflow = Arc::new(WorkflowManager::new(
            config.clone(),
            store.clone() as Arc<dyn HistoryStore>,
            tx.clone(),
        ));
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry = registry.register(tool);
        }
        let handler = CycleHandler::new(
            config,
            manager.clone(),
            workflow.clone(),
            Arc::new(registry),
            backend,
            monitor,
            store.clone() as Arc<dyn HistoryStore>,
            tx,
        );
        Harness { manager, workflow, handler, store, channel }
    }

    /// Drain the due set serially until quiescent.
    async fn drain(h: &Harness) {
        while let Some(id) = h.manager.claim_next() {
            h.handler.run_cycle(id).await.unwrap();
            h.manager.finish_cycle(id);
        }
    }

    #[tokio::test]
    async fn test_conversation_only_reply_returns_to_idle() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![vec![
                AgentEvent::ThoughtEmitted { text: "simple question".into() },
                AgentEvent::FinalResponse { text: "direct answer".into() },
            ]],
        );
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("hi")).unwrap();
        drain(&h).await;

        assert_eq!(h.manager.get(&coordinator).unwrap().state(), AgentState::Idle);
        let history = h.store.load(coordinator);
        assert_eq!(history.last().unwrap().content, "direct answer");
        // Thought forwarded to the notice stream.
        let mut channel = h.channel;
        let notices = channel.drain();
        assert!(notices.iter().any(|n| matches!(n, Notice::Thought { .. })));
        assert!(notices.iter().any(|n| matches!(n, Notice::FinalResponse { .. })));
    }

    #[tokio::test]
    async fn test_tool_suspension_reschedules_for_followup() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![
                vec![AgentEvent::ToolRequested {
                    call_id: CallId::new(),
                    name: "echo".into(),
                    arguments: json!({"ping": true}),
                }],
                vec![AgentEvent::FinalResponse { text: "after tool".into() }],
            ],
        );
        let echo = Arc::new(EchoTool::new());
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![echo.clone()]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();
        drain(&h).await;

        assert_eq!(echo.calls.lock().len(), 1);
        let history = h.store.load(coordinator);
        // Tool result appended as a turn before the follow-up answer.
        assert!(history.iter().any(|t| t.content.contains("\"tool\":\"echo\"")));
        assert_eq!(history.last().unwrap().content, "after tool");
        assert_eq!(h.manager.get(&coordinator).unwrap().state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_flaky_tool_retries_once_then_succeeds() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![
                vec![AgentEvent::ToolRequested {
                    call_id: CallId::new(),
                    name: "flaky".into(),
                    arguments: json!({}),
                }],
                vec![AgentEvent::FinalResponse { text: "done".into() }],
            ],
        );
        let flaky = Arc::new(FlakyTool { failures_left: Mutex::new(1) });
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![flaky]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();
        drain(&h).await;

        let history = h.store.load(coordinator);
        assert!(history.iter().any(|t| t.content.contains("error")));
        assert!(history.iter().any(|t| t.content.contains("\"result\":\"ok\"")));
        assert_eq!(h.manager.get(&coordinator).unwrap().faults(), 0);
    }

    #[tokio::test]
    async fn test_tool_failure_past_retry_budget_is_a_fault() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![vec![AgentEvent::ToolRequested {
                call_id: CallId::new(),
                name: "flaky".into(),
                arguments: json!({}),
            }]],
        );
        let flaky = Arc::new(FlakyTool { failures_left: Mutex::new(u32::MAX) });
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![flaky]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();
        drain(&h).await;

        // Every retry re-runs the same failing script until the agent's
        // own budget is exhausted.
        assert_eq!(h.manager.get(&coordinator).unwrap().state(), AgentState::Failed);
    }

    #[tokio::test]
    async fn test_backend_outage_exhausts_budget_and_fails() {
        let h = harness_with(
            Arc::new(crate::backend::UnavailableBackend),
            Arc::new(AllowAll),
            vec![],
        );
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();
        drain(&h).await;

        let agent = h.manager.get(&coordinator).unwrap();
        assert_eq!(agent.state(), AgentState::Failed);
        assert_eq!(agent.faults(), 3);
    }

    #[tokio::test]
    async fn test_remediation_appends_guidance_and_reinvokes() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![
                vec![AgentEvent::FinalResponse { text: "rude answer".into() }],
                vec![AgentEvent::FinalResponse { text: "polite answer".into() }],
            ],
        );
        let monitor = DenyList::remediating(vec!["rude".into()], "be polite");
        let h = harness_with(Arc::new(backend), Arc::new(monitor), vec![]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();
        drain(&h).await;

        let history = h.store.load(coordinator);
        // The rude answer was never applied; guidance landed instead.
        assert!(!history.iter().any(|t| t.content.contains("rude")));
        assert!(history.iter().any(|t| t.content.contains("[monitor] be polite")));
        assert_eq!(history.last().unwrap().content, "polite answer");
        assert_eq!(h.manager.get(&coordinator).unwrap().state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_blocked_final_response_ends_cycle_in_error() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![vec![AgentEvent::FinalResponse { text: "forbidden content".into() }]],
        );
        let monitor = DenyList::blocking(vec!["forbidden".into()]);
        let h = harness_with(Arc::new(backend), Arc::new(monitor), vec![]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();
        drain(&h).await;

        let agent = h.manager.get(&coordinator).unwrap();
        assert_eq!(agent.state(), AgentState::Error);
        // The blocked text never reached the history or the notice stream.
        assert!(!h.store.load(coordinator).iter().any(|t| t.content.contains("forbidden")));
        let mut channel = h.channel;
        assert!(!channel
            .drain()
            .iter()
            .any(|n| matches!(n, Notice::FinalResponse { .. })));
    }

    #[tokio::test]
    async fn test_second_final_response_is_malformed_output() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![vec![
                AgentEvent::FinalResponse { text: "one".into() },
                AgentEvent::FinalResponse { text: "two".into() },
            ]],
        );
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();

        let id = h.manager.claim_next().unwrap();
        h.handler.run_cycle(id).await.unwrap();
        h.manager.finish_cycle(id);

        let agent = h.manager.get(&coordinator).unwrap();
        assert_eq!(agent.state(), AgentState::Error);
        assert_eq!(agent.faults(), 1);
    }

    #[tokio::test]
    async fn test_plan_only_cycle_reschedules_coordinator() {
        // Ends its first cycle on submit_plan alone; the delegation must
        // still happen through a follow-up turn.
        let backend = ScriptedBackend::new()
            .role(
                AgentRole::Coordinator,
                vec![
                    vec![AgentEvent::ToolRequested {
                        call_id: CallId::new(),
                        name: "submit_plan".into(),
                        arguments: json!({"tasks": ["one thing"]}),
                    }],
                    vec![AgentEvent::FinalResponse { text: "delegating".into() }],
                ],
            )
            .role(
                AgentRole::ProjectManager,
                vec![vec![AgentEvent::FinalResponse { text: "nothing left to do".into() }]],
            );
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();
        drain(&h).await;

        // The plan was consumed by a later cycle's delegation, and the
        // spawned manager already reported and retired.
        assert!(!h.workflow.has_plan(&coordinator));
        assert_eq!(h.manager.agent_count(), 1);
        assert_eq!(h.manager.get(&coordinator).unwrap().state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_spawn_agent_tool_links_child_before_cycle_continues() {
        let backend = ScriptedBackend::new().role(
            AgentRole::Coordinator,
            vec![
                vec![AgentEvent::ToolRequested {
                    call_id: CallId::new(),
                    name: "spawn_agent".into(),
                    arguments: json!({"role": "worker", "task": "look around"}),
                }],
                vec![AgentEvent::FinalResponse { text: "spawned".into() }],
            ],
        );
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        h.manager.deliver(coordinator, Turn::user("go")).unwrap();

        let id = h.manager.claim_next().unwrap();
        h.handler.run_cycle(id).await.unwrap();
        h.manager.finish_cycle(id);

        let children = h.manager.children_of(&coordinator);
        assert_eq!(children.len(), 1);
        let child = h.manager.get(&children[0]).unwrap();
        assert_eq!(child.role(), AgentRole::Worker);
        assert_eq!(child.inbox_len(), 1);
        h.manager.check_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_worker_spawn_attempt_is_rejected_not_fatal() {
        let worker_script = vec![
            vec![AgentEvent::ToolRequested {
                call_id: CallId::new(),
                name: "spawn_agent".into(),
                arguments: json!({"role": "worker"}),
            }],
            vec![AgentEvent::FinalResponse { text: "did it alone".into() }],
        ];
        let backend = ScriptedBackend::new().role(AgentRole::Worker, worker_script);
        let h = harness_with(Arc::new(backend), Arc::new(AllowAll), vec![]);
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        let worker = h.manager.create(AgentRole::Worker, Some(coordinator)).unwrap();
        h.manager.deliver(worker, Turn::user("Task: solo work")).unwrap();
        drain(&h).await;

        // Spawn rejected at the boundary; the worker carried on and its
        // report was accepted (no assignment, so it simply waits).
        assert!(h.manager.children_of(&worker).is_empty());
        let history = h.store.load(worker);
        assert!(history.iter().any(|t| t.content.contains("error")));
        assert_ne!(h.manager.get(&worker).unwrap().state(), AgentState::Failed);
    }

    #[tokio::test]
    async fn test_route_message_schedules_target() {
        let h = harness_with(
            Arc::new(ScriptedBackend::new()),
            Arc::new(AllowAll),
            vec![],
        );
        let coordinator = h.manager.create(AgentRole::Coordinator, None).unwrap();
        let peer = h.manager.create(AgentRole::ProjectManager, Some(coordinator)).unwrap();
        let handle = h.manager.get(&coordinator).unwrap();

        let flow = h
            .handler
            .execute_tool(
                &handle,
                CallId::new(),
                "route_message",
                json!({"to": peer.to_string(), "body": "hello"}),
            )
            .await;
        assert!(matches!(flow, ToolFlow::Done { followup: true }));
        assert_eq!(h.manager.get(&peer).unwrap().inbox_len(), 1);
        assert_eq!(h.manager.claim_next(), Some(peer));
    }
}
