//! Tool registry and dispatch
//!
//! The registry holds the opaque tools an embedding application provides.
//! The four structured names (`spawn_agent`, `route_message`,
//! `submit_plan`, `review_task`) are intercepted by the cycle handler and
//! workflow before the registry is consulted, so they are reserved here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::{AgentId, AgentRole, TaskId};

/// Names handled by the engine itself, never by a registered tool
pub const RESERVED_TOOLS: [&str; 4] =
    ["spawn_agent", "route_message", "submit_plan", "review_task"];

/// Context handed to a tool on behalf of the invoking agent
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent: AgentId,
    pub role: AgentRole,
    pub task: Option<TaskId>,
}

/// A capability invokable by agents
///
/// Implementations are opaque to the engine; a failure is retried once
/// with the error text appended to the agent's context, then surfaced to
/// the parent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Machine-readable tool name, unique within a registry
    fn name(&self) -> &str;

    /// One-line description advertised to the backend
    fn description(&self) -> &str;

    async fn call(&self, ctx: &ToolContext, arguments: Value) -> anyhow::Result<Value>;
}

/// Specification of an available tool, advertised to the backend
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// Immutable-after-construction map of tool name to handler.
/// Safe for unsynchronized concurrent reads.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool. Panics on a reserved or duplicate name; both are
    /// construction-time configuration mistakes.
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        let name = tool.name().to_string();
        assert!(
            !RESERVED_TOOLS.contains(&name.as_str()),
            "tool name '{name}' is reserved by the engine"
        );
        let replaced = self.tools.insert(name.clone(), tool);
        assert!(replaced.is_none(), "duplicate tool name '{name}'");
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Specs for every registered tool plus the engine's built-ins
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = vec![
            ToolSpec {
                name: "spawn_agent".into(),
                description: "Create a child agent with a given role and initial task".into(),
            },
            ToolSpec {
                name: "route_message".into(),
                description: "Deliver a message to another agent".into(),
            },
            ToolSpec {
                name: "submit_plan".into(),
                description: "Submit a delegation plan or task decomposition".into(),
            },
            ToolSpec {
                name: "review_task".into(),
                description: "Accept or request revision of a worker report".into(),
            },
        ];
        specs.extend(self.tools.values().map(|t| ToolSpec {
            name: t.name().to_string(),
            description: t.description().to_string(),
        }));
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_tools {
    use super::*;
    use parking_lot::Mutex;

    /// Echoes its arguments back; records every call for assertions
    pub struct EchoTool {
        pub calls: Mutex<Vec<Value>>,
    }

    impl EchoTool {
        pub fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments back"
        }

        async fn call(&self, _ctx: &ToolContext, arguments: Value) -> anyhow::Result<Value> {
            self.calls.lock().push(arguments.clone());
            Ok(arguments)
        }
    }

    /// Fails a fixed number of times, then succeeds
    pub struct FlakyTool {
        pub failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "Fails until its failure budget is spent"
        }

        async fn call(&self, _ctx: &ToolContext, _arguments: Value) -> anyhow::Result<Value> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("transient tool failure");
            }
            Ok(Value::String("ok".into()))
        }
    }
}
