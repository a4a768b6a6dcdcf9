//! Workflow manager - the three-tier delegation protocol
//!
//! Encodes coordinator → manager → worker delegation as reactions to
//! agent observations rather than imperative control flow: the cycle
//! handler reports transitions and structured tool calls here, and this
//! module owns the task/project records they affect.
//!
//! Report review policy: with `auto_accept_reports` (the default) a
//! worker's report is accepted the moment it lands in `Waiting`; with it
//! off, the report is routed to the owning manager, which accepts or
//! requests revision through the `review_task` tool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agent::AgentHandle;
use crate::channel::NoticeSender;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::manager::AgentManager;
use crate::protocol::{
    AgentId, AgentRole, Notice, Project, ProjectId, ProjectStatus, Task, TaskId, TaskStatus, Turn,
};
use crate::state::AgentState;
use crate::store::HistoryStore;

/// Owns projects and tasks, and reacts to the hierarchy's progress
pub struct WorkflowManager {
    config: Arc<EngineConfig>,
    store: Arc<dyn HistoryStore>,
    notices: NoticeSender,
    tasks: RwLock<HashMap<TaskId, Task>>,
    projects: RwLock<HashMap<ProjectId, Project>>,
    /// Projects created by `submit`, not yet delegated, oldest first
    open_projects: Mutex<VecDeque<ProjectId>>,
    /// Terminal projects whose user-visible answer is still owed, oldest
    /// first; popped when the Coordinator reports without a pending plan
    awaiting_outcome: Mutex<VecDeque<ProjectId>>,
    /// `submit_plan` payloads, consumed when the submitting agent's
    /// transition makes them effective
    plans: Mutex<HashMap<AgentId, Vec<String>>>,
    /// ProjectManager -> supervised project
    manager_projects: RwLock<HashMap<AgentId, ProjectId>>,
    /// Worker reports pending review, in arrival order
    pending_reports: Mutex<VecDeque<(TaskId, String)>>,
}

impl WorkflowManager {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn HistoryStore>,
        notices: NoticeSender,
    ) -> Self {
        Self {
            config,
            store,
            notices,
            tasks: RwLock::new(HashMap::new()),
            projects: RwLock::new(HashMap::new()),
            open_projects: Mutex::new(VecDeque::new()),
            awaiting_outcome: Mutex::new(VecDeque::new()),
            plans: Mutex::new(HashMap::new()),
            manager_projects: RwLock::new(HashMap::new()),
            pending_reports: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a new project awaiting delegation
    pub fn create_project(&self, request: impl Into<String>) -> ProjectId {
        let id = ProjectId::new();
        let project = Project {
            id,
            request: request.into(),
            manager: None,
            tasks: Vec::new(),
            status: ProjectStatus::Pending,
            outcome: None,
        };
        self.projects.write().insert(id, project);
        self.open_projects.lock().push_back(id);
        info!(project_id = %id, "Created project");
        id
    }

    pub fn project(&self, id: &ProjectId) -> Option<Project> {
        self.projects.read().get(id).cloned()
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().get(id).cloned()
    }

    pub fn tasks_of(&self, project: &ProjectId) -> Vec<Task> {
        let ids = match self.projects.read().get(project) {
            Some(p) => p.tasks.clone(),
            None => return Vec::new(),
        };
        let tasks = self.tasks.read();
        ids.iter().filter_map(|id| tasks.get(id).cloned()).collect()
    }

    pub(crate) fn has_plan(&self, agent: &AgentId) -> bool {
        self.plans.lock().contains_key(agent)
    }

    // --- structured tools -------------------------------------------------

    /// Handle a workflow-owned tool call; `None` if the name is not ours.
    pub(crate) fn handle_tool(
        &self,
        manager: &AgentManager,
        agent: &AgentHandle,
        name: &str,
        arguments: &Value,
    ) -> Option<anyhow::Result<Value>> {
        match name {
            "submit_plan" => Some(self.tool_submit_plan(agent, arguments)),
            "review_task" => Some(self.tool_review_task(manager, agent, arguments)),
            _ => None,
        }
    }

    fn tool_submit_plan(&self, agent: &AgentHandle, arguments: &Value) -> anyhow::Result<Value> {
        if !matches!(agent.role, AgentRole::Coordinator | AgentRole::ProjectManager) {
            anyhow::bail!("only coordinators and project managers submit plans");
        }
        let items: Vec<String> = arguments
            .get("tasks")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        if items.is_empty() {
            anyhow::bail!("a plan needs at least one task");
        }
        let count = items.len();
        self.plans.lock().insert(agent.id, items);
        debug!(agent_id = %agent.id, tasks = count, "Plan submitted");
        Ok(json!({ "accepted": true, "task_count": count }))
    }

    fn tool_review_task(
        &self,
        manager: &AgentManager,
        agent: &AgentHandle,
        arguments: &Value,
    ) -> anyhow::Result<Value> {
        if agent.role != AgentRole::ProjectManager {
            anyhow::bail!("only project managers review tasks");
        }
        let task_id = match arguments.get("task").and_then(Value::as_str) {
            Some(raw) => Some(raw.parse::<TaskId>()?),
            None => None,
        };
        let task_id = task_id
            .or_else(|| self.oldest_pending_for(manager, &agent.id))
            .ok_or_else(|| anyhow::anyhow!("no report pending review"))?;

        match arguments.get("verdict").and_then(Value::as_str) {
            Some("accept") | None => {
                self.accept_report(manager, task_id)?;
                Ok(json!({ "task": task_id, "accepted": true }))
            }
            Some("revise") => {
                let feedback = arguments
                    .get("feedback")
                    .and_then(Value::as_str)
                    .unwrap_or("please revise your result");
                self.request_revision(manager, task_id, feedback)?;
                Ok(json!({ "task": task_id, "revision_requested": true }))
            }
            Some(other) => anyhow::bail!("unknown verdict '{other}'"),
        }
    }

    fn oldest_pending_for(&self, manager: &AgentManager, pm: &AgentId) -> Option<TaskId> {
        let pending = self.pending_reports.lock();
        let tasks = self.tasks.read();
        pending
            .iter()
            .map(|(id, _)| *id)
            .find(|id| {
                tasks
                    .get(id)
                    .and_then(|t| t.assignee)
                    .and_then(|w| manager.parent_of(&w))
                    .is_some_and(|parent| parent == *pm)
            })
    }

    // --- transition reactions ---------------------------------------------

    /// Coordinator entered `Reporting`. With a pending plan this is the
    /// delegation point; without one it is the final user-visible answer.
    pub(crate) fn on_coordinator_reporting(
        &self,
        manager: &AgentManager,
        coordinator: AgentId,
        text: &str,
    ) -> Result<(), EngineError> {
        let plan = self.plans.lock().remove(&coordinator);
        match plan {
            Some(items) => self.delegate(manager, coordinator, items),
            None => {
                let settled = self.awaiting_outcome.lock().pop_front().or_else(|| {
                    // No delegation happened: the reply answers the oldest
                    // submitted request directly.
                    let direct = self.open_projects.lock().pop_front();
                    if let Some(id) = direct {
                        self.set_project_status(id, ProjectStatus::Completed);
                    }
                    direct
                });
                if let Some(project_id) = settled {
                    let status = {
                        let mut projects = self.projects.write();
                        let project = projects
                            .get_mut(&project_id)
                            .ok_or(EngineError::ProjectNotFound(project_id))?;
                        project.outcome = Some(text.to_string());
                        project.status
                    };
                    info!(project_id = %project_id, ?status, "Project outcome delivered");
                    let _ = self.notices.send(Notice::ProjectOutcome {
                        project: project_id,
                        status,
                        text: text.to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    fn delegate(
        &self,
        manager: &AgentManager,
        coordinator: AgentId,
        items: Vec<String>,
    ) -> Result<(), EngineError> {
        // Bind the popped value first so the lock guard drops before the
        // `None` arm re-locks `open_projects` via `create_and_claim`.
        let popped = self.open_projects.lock().pop_front();
        let project_id = match popped {
            Some(id) => id,
            // Agent-driven delegation without a submitted request.
            None => self.create_and_claim(items.join("; ")),
        };

        let pm = manager.create(AgentRole::ProjectManager, Some(coordinator))?;
        let request = {
            let mut projects = self.projects.write();
            let project = projects
                .get_mut(&project_id)
                .ok_or(EngineError::ProjectNotFound(project_id))?;
            project.manager = Some(pm);
            project.status = ProjectStatus::Active;
            project.request.clone()
        };
        self.manager_projects.write().insert(pm, project_id);
        let _ = self.notices.send(Notice::ProjectStatusChanged {
            project: project_id,
            status: ProjectStatus::Active,
        });

        let mut plan_text = format!("Objective: {request}\nPlan:\n");
        for item in &items {
            plan_text.push_str("- ");
            plan_text.push_str(item);
            plan_text.push('\n');
        }
        manager.deliver(pm, Turn::user(plan_text))?;
        info!(project_id = %project_id, manager_id = %pm, "Delegated project");
        Ok(())
    }

    fn create_and_claim(&self, request: String) -> ProjectId {
        let id = self.create_project(request);
        // create_project queued it as open; claim it right back.
        self.open_projects.lock().retain(|p| p != &id);
        id
    }

    /// ProjectManager entered `BuildingTeamTasks`: create and assign one
    /// task per plan item, spawning one Worker each, then move to
    /// `Managing`.
    pub(crate) fn on_manager_building(
        &self,
        manager: &AgentManager,
        pm: AgentId,
    ) -> Result<(), EngineError> {
        let items = self.plans.lock().remove(&pm).unwrap_or_default();
        let project_id = match self.manager_projects.read().get(&pm).copied() {
            Some(id) => id,
            None => {
                // PM spawned outside the submit path; track it anyway.
                let id = self.create_and_claim("delegated work".into());
                self.projects.write().get_mut(&id).unwrap().manager = Some(pm);
                self.manager_projects.write().insert(pm, id);
                id
            }
        };

        for description in items {
            let worker = manager.create(AgentRole::Worker, Some(pm))?;
            let task_id = TaskId::new();
            let task = Task {
                id: task_id,
                description: description.clone(),
                project: project_id,
                status: TaskStatus::Assigned,
                assignee: Some(worker),
                result: None,
            };
            self.tasks.write().insert(task_id, task);
            self.projects.write().get_mut(&project_id).unwrap().tasks.push(task_id);
            manager.require(&worker)?.assign(Some(task_id));
            let _ = self
                .notices
                .send(Notice::TaskStatusChanged { task: task_id, status: TaskStatus::Assigned });
            manager.deliver(worker, Turn::user(format!("Task: {description}")))?;
            debug!(task_id = %task_id, worker_id = %worker, "Assigned task");
        }

        manager.transition(pm, AgentState::Managing)?;
        if self.projects.read().get(&project_id).is_some_and(|p| p.tasks.is_empty()) {
            // Nothing to supervise; prompt the manager to report at once.
            self.notify_all_terminal(manager, pm, project_id)?;
        }
        Ok(())
    }

    /// Worker entered `Working`
    pub(crate) fn on_worker_working(&self, worker: &AgentHandle) {
        if let Some(task_id) = worker.assignment() {
            self.set_task_status(task_id, TaskStatus::InProgress);
        }
    }

    /// Worker entered `Waiting` with a completed report
    pub(crate) fn on_worker_waiting(
        &self,
        manager: &AgentManager,
        worker: &AgentHandle,
        report: &str,
    ) -> Result<(), EngineError> {
        let Some(task_id) = worker.assignment() else {
            warn!(agent_id = %worker.id, "Worker reported without an assignment");
            return Ok(());
        };
        self.pending_reports.lock().push_back((task_id, report.to_string()));

        if self.config.auto_accept_reports {
            self.accept_report(manager, task_id)?;
        } else if let Some(pm) = worker.parent {
            manager.deliver(
                pm,
                Turn::user(format!(
                    "[worker {}] finished task {task_id}: {report}",
                    worker.id
                )),
            )?;
        }
        Ok(())
    }

    /// Accept a waiting worker's report: task completes, worker reports
    /// upward and is retired.
    pub(crate) fn accept_report(
        &self,
        manager: &AgentManager,
        task_id: TaskId,
    ) -> Result<(), EngineError> {
        let report = self
            .take_pending(task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;
        let (worker_id, project_id) = {
            let tasks = self.tasks.read();
            let task = tasks.get(&task_id).ok_or(EngineError::TaskNotFound(task_id))?;
            (task.assignee.ok_or(EngineError::TaskNotFound(task_id))?, task.project)
        };

        manager.transition(worker_id, AgentState::Reporting)?;
        {
            let mut tasks = self.tasks.write();
            if let Some(task) = tasks.get_mut(&task_id) {
                task.status = TaskStatus::Completed;
                task.result = Some(report);
            }
        }
        let _ = self
            .notices
            .send(Notice::TaskStatusChanged { task: task_id, status: TaskStatus::Completed });
        info!(task_id = %task_id, worker_id = %worker_id, "Task completed");

        // Result reported upward; the worker's oversight is complete.
        manager.transition(worker_id, AgentState::Idle)?;
        manager.retire(&worker_id)?;
        self.store.forget(worker_id);

        self.after_task_terminal(manager, project_id)
    }

    fn request_revision(
        &self,
        manager: &AgentManager,
        task_id: TaskId,
        feedback: &str,
    ) -> Result<(), EngineError> {
        self.take_pending(task_id).ok_or(EngineError::TaskNotFound(task_id))?;
        let worker_id = self
            .tasks
            .read()
            .get(&task_id)
            .and_then(|t| t.assignee)
            .ok_or(EngineError::TaskNotFound(task_id))?;
        manager.transition(worker_id, AgentState::Working)?;
        self.set_task_status(task_id, TaskStatus::InProgress);
        manager.deliver(worker_id, Turn::user(format!("Revision requested: {feedback}")))?;
        info!(task_id = %task_id, worker_id = %worker_id, "Revision requested");
        Ok(())
    }

    fn take_pending(&self, task_id: TaskId) -> Option<String> {
        let mut pending = self.pending_reports.lock();
        let pos = pending.iter().position(|(id, _)| *id == task_id)?;
        pending.remove(pos).map(|(_, report)| report)
    }

    /// ProjectManager entered `Reporting` with its aggregated summary
    pub(crate) fn on_manager_reporting(
        &self,
        manager: &AgentManager,
        pm: AgentId,
        text: &str,
    ) -> Result<(), EngineError> {
        let Some(project_id) = self.manager_projects.write().remove(&pm) else {
            warn!(agent_id = %pm, "Manager reported without a supervised project");
            return Ok(());
        };

        let status = self.derive_status(&project_id);
        if !status.is_terminal() {
            warn!(project_id = %project_id, "Manager reported before all tasks were terminal");
        }
        self.set_project_status(project_id, status);
        self.awaiting_outcome.lock().push_back(project_id);

        let parent = manager.require(&pm)?.parent;
        if let Some(coordinator) = parent {
            manager.deliver(
                coordinator,
                Turn::user(format!("[project {project_id}] {text}")),
            )?;
        }

        // All workers were retired as their tasks closed; the manager's
        // oversight is done once the summary is on its way up.
        manager.transition(pm, AgentState::Idle)?;
        if let Err(err) = manager.retire(&pm) {
            warn!(agent_id = %pm, error = %err, "Could not retire reporting manager");
        } else {
            self.store.forget(pm);
        }
        Ok(())
    }

    /// An agent reached `Failed` (budget exhausted or fatal invariant)
    pub(crate) fn on_agent_failed(
        &self,
        manager: &AgentManager,
        failed: AgentId,
        detail: &str,
    ) -> Result<(), EngineError> {
        let Some(handle) = manager.get(&failed) else { return Ok(()) };
        match handle.role {
            AgentRole::Worker => {
                let pm = handle.parent;
                let project = handle.assignment().and_then(|task_id| {
                    self.fail_task(task_id);
                    self.tasks.read().get(&task_id).map(|t| t.project)
                });
                manager.retire(&failed)?;
                self.store.forget(failed);
                if let Some(pm) = pm {
                    manager.deliver(
                        pm,
                        Turn::user(format!("[engine] worker {failed} failed: {detail}")),
                    )?;
                }
                if let Some(project_id) = project {
                    self.after_task_terminal(manager, project_id)?;
                }
            }
            AgentRole::ProjectManager => {
                // Cancel the subtree depth-first before touching the manager.
                for child in manager.descendants_depth_first(&failed) {
                    if let Some(task_id) = manager.get(&child).and_then(|c| c.assignment()) {
                        self.fail_task(task_id);
                    }
                    manager.retire(&child)?;
                    self.store.forget(child);
                }
                self.plans.lock().remove(&failed);
                let project_id = self.manager_projects.write().remove(&failed);
                if let Some(project_id) = project_id {
                    self.set_project_status(project_id, ProjectStatus::Failed);
                    self.awaiting_outcome.lock().push_back(project_id);
                }
                let parent = handle.parent;
                manager.retire(&failed)?;
                self.store.forget(failed);
                if let Some(coordinator) = parent {
                    manager.deliver(
                        coordinator,
                        Turn::user(format!(
                            "[engine] project manager {failed} failed: {detail}"
                        )),
                    )?;
                }
            }
            AgentRole::Coordinator => {
                // The backstop itself is gone; close every live project.
                self.plans.lock().remove(&failed);
                let live: Vec<ProjectId> = self
                    .projects
                    .read()
                    .values()
                    .filter(|p| !p.status.is_terminal())
                    .map(|p| p.id)
                    .collect();
                for project_id in &live {
                    self.set_project_status(*project_id, ProjectStatus::Failed);
                    let _ = self.notices.send(Notice::ProjectOutcome {
                        project: *project_id,
                        status: ProjectStatus::Failed,
                        text: format!("coordinator failed: {detail}"),
                    });
                }
                self.open_projects.lock().retain(|p| !live.contains(p));
                self.awaiting_outcome.lock().retain(|p| !live.contains(p));
            }
            AgentRole::Monitor => {}
        }
        Ok(())
    }

    /// An agent's proposed output was blocked by policy.
    ///
    /// The blocked agent itself parks in `Error` and is never retried
    /// verbatim, so its obligations must be settled here: a Worker's task
    /// fails, a ProjectManager's project fails and is queued for the
    /// Coordinator's user-visible answer.
    pub(crate) fn on_policy_blocked(
        &self,
        manager: &AgentManager,
        blocked: AgentId,
        reason: &str,
    ) -> Result<(), EngineError> {
        let Some(handle) = manager.get(&blocked) else { return Ok(()) };
        let notification = Turn::user(format!(
            "[engine] {} agent {blocked} was blocked by policy: {reason}",
            handle.role
        ));
        match handle.role {
            AgentRole::Worker => {
                let project = handle.assignment().and_then(|task_id| {
                    self.fail_task(task_id);
                    self.tasks.read().get(&task_id).map(|t| t.project)
                });
                if let Some(pm) = handle.parent {
                    manager.deliver(pm, notification)?;
                }
                if let Some(project_id) = project {
                    self.after_task_terminal(manager, project_id)?;
                }
                Ok(())
            }
            AgentRole::ProjectManager => {
                self.plans.lock().remove(&blocked);
                if let Some(project_id) = self.manager_projects.write().remove(&blocked) {
                    self.set_project_status(project_id, ProjectStatus::Failed);
                    self.awaiting_outcome.lock().push_back(project_id);
                }
                if let Some(coordinator) = handle.parent {
                    manager.deliver(coordinator, notification)?;
                }
                Ok(())
            }
            AgentRole::Coordinator => {
                // The backstop itself was blocked: close the oldest open
                // request directly.
                self.plans.lock().remove(&blocked);
                if let Some(project_id) = self.open_projects.lock().pop_front() {
                    self.set_project_status(project_id, ProjectStatus::Failed);
                    let _ = self.notices.send(Notice::ProjectOutcome {
                        project: project_id,
                        status: ProjectStatus::Failed,
                        text: format!("blocked by policy: {reason}"),
                    });
                }
                Ok(())
            }
            AgentRole::Monitor => match handle.parent {
                Some(parent) => manager.deliver(parent, notification),
                None => Ok(()),
            },
        }
    }

    /// Cancel a project: retire its live workers depth-first, then the
    /// manager, and fail every non-terminal task.
    pub fn cancel_project(
        &self,
        manager: &AgentManager,
        project_id: ProjectId,
    ) -> Result<(), EngineError> {
        let project = self
            .project(&project_id)
            .ok_or(EngineError::ProjectNotFound(project_id))?;

        if let Some(pm) = project.manager {
            if manager.contains(&pm) {
                for child in manager.descendants_depth_first(&pm) {
                    manager.retire(&child)?;
                    self.store.forget(child);
                }
                manager.retire(&pm)?;
                self.store.forget(pm);
            }
            self.plans.lock().remove(&pm);
            self.manager_projects.write().remove(&pm);
        }
        for task_id in &project.tasks {
            let terminal =
                self.tasks.read().get(task_id).is_some_and(|t| t.status.is_terminal());
            if !terminal {
                self.fail_task(*task_id);
            }
        }
        self.open_projects.lock().retain(|p| p != &project_id);
        self.awaiting_outcome.lock().retain(|p| p != &project_id);
        self.set_project_status(project_id, ProjectStatus::Failed);
        info!(project_id = %project_id, "Cancelled project");
        Ok(())
    }

    // --- internals ---------------------------------------------------------

    fn fail_task(&self, task_id: TaskId) {
        self.take_pending(task_id);
        self.set_task_status(task_id, TaskStatus::Failed);
    }

    fn set_task_status(&self, task_id: TaskId, status: TaskStatus) {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(&task_id) else { return };
        if task.status == status {
            return;
        }
        task.status = status;
        drop(tasks);
        let _ = self.notices.send(Notice::TaskStatusChanged { task: task_id, status });
    }

    fn set_project_status(&self, project_id: ProjectId, status: ProjectStatus) {
        let mut projects = self.projects.write();
        let Some(project) = projects.get_mut(&project_id) else { return };
        if project.status == status {
            return;
        }
        project.status = status;
        drop(projects);
        let _ = self.notices.send(Notice::ProjectStatusChanged { project: project_id, status });
    }

    fn derive_status(&self, project_id: &ProjectId) -> ProjectStatus {
        let tasks = self.tasks_of(project_id);
        if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            ProjectStatus::Failed
        } else if !tasks.is_empty() && tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            ProjectStatus::Completed
        } else if tasks.is_empty() {
            ProjectStatus::Completed
        } else {
            ProjectStatus::Active
        }
    }

    /// After any task reaches a terminal status: a failed task fails the
    /// project at once, and once every task is terminal the supervising
    /// manager is prompted to aggregate (its `Managing` self-loop ticks on
    /// each update).
    fn after_task_terminal(
        &self,
        manager: &AgentManager,
        project_id: ProjectId,
    ) -> Result<(), EngineError> {
        let (pm, statuses) = {
            let projects = self.projects.read();
            let Some(project) = projects.get(&project_id) else { return Ok(()) };
            let tasks = self.tasks.read();
            let statuses: Vec<TaskStatus> = project
                .tasks
                .iter()
                .filter_map(|id| tasks.get(id).map(|t| t.status))
                .collect();
            (project.manager, statuses)
        };

        if statuses.iter().any(|s| *s == TaskStatus::Failed) {
            self.set_project_status(project_id, ProjectStatus::Failed);
        }

        let Some(pm) = pm else { return Ok(()) };
        if manager.get(&pm).map(|h| h.state()) == Some(AgentState::Managing) {
            // The supervising manager observes every status update.
            manager.transition(pm, AgentState::Managing)?;
        }
        if statuses.iter().all(TaskStatus::is_terminal) {
            self.notify_all_terminal(manager, pm, project_id)?;
        }
        Ok(())
    }

    fn notify_all_terminal(
        &self,
        manager: &AgentManager,
        pm: AgentId,
        project_id: ProjectId,
    ) -> Result<(), EngineError> {
        if !manager.contains(&pm) {
            return Ok(());
        }
        let mut summary = String::from("All assigned tasks are terminal:\n");
        for task in self.tasks_of(&project_id) {
            let line = match (&task.status, &task.result) {
                (TaskStatus::Completed, Some(result)) => {
                    format!("- {}: completed: {result}\n", task.description)
                }
                (status, _) => format!("- {}: {status:?}\n", task.description),
            };
            summary.push_str(&line);
        }
        manager.deliver(pm, Turn::user(summary))
    }
}
