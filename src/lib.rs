//! # Conclave
//!
//! Constitutional hierarchical multi-agent orchestration engine.
//!
//! A root Coordinator receives user requests and either answers directly
//! or delegates: a ProjectManager decomposes the plan into tasks, one
//! Worker per task executes, and results aggregate back up. Every
//! proposed output passes through a compliance monitor before its side
//! effect is applied.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────┐
//!                    │       COORDINATOR        │  ◄── user requests
//!                    │ plan / delegate / answer │  ──► project outcomes
//!                    └───────────┬──────────────┘
//!             ┌──────────────────┼──────────────────┐
//!             ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//!     │ Proj.Manager │   │ Proj.Manager │   │   Monitor   │
//!     │ (one/project)│   │              │   │ (no children)│
//!     └──────┬───────┘   └──────┬───────┘   └─────────────┘
//!        ┌───┴───┐          ┌───┴───┐
//!        ▼       ▼          ▼       ▼
//!     ┌─────┐ ┌─────┐    ┌─────┐ ┌─────┐
//!     │ W:t1│ │ W:t2│    │ W:t3│ │ W:t4│     one Worker per task
//!     └─────┘ └─────┘    └─────┘ └─────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Cycle**: one agent invocation, consumed as an ordered event stream
//! - **Hierarchy**: strict ownership tree; spawning and routing are
//!   validated against it
//! - **Workflow**: project/task records driven by agent state changes
//! - **Monitor**: reviews every FinalResponse and tool request; allow,
//!   remediate (once per cycle), or block

pub mod agent;
pub mod backend;
pub mod channel;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod manager;
pub mod monitor;
pub mod protocol;
pub mod state;
pub mod store;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentHandle};
pub use backend::{Backend, CycleRequest, ScriptBatch, ScriptedBackend};
pub use channel::{cycle_channel, EngineChannel, EventSink, EventStream};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::EngineError;
pub use hierarchy::HierarchyTree;
pub use manager::AgentManager;
pub use monitor::{AllowAll, ComplianceMonitor, DenyList};
pub use state::AgentState;
pub use store::{HistoryStore, MemoryStore};
pub use tools::{Tool, ToolContext, ToolRegistry, ToolSpec, RESERVED_TOOLS};
pub use workflow::WorkflowManager;

pub use protocol::{
    AgentEvent, AgentId, AgentRole, CallId, FaultKind, Notice, Project, ProjectId, ProjectStatus,
    Proposal, Task, TaskId, TaskStatus, Turn, TurnRole, Verdict,
};
