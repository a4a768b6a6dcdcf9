//! Engine configuration
//!
//! Retry and backoff constants are deliberately configuration with
//! documented defaults rather than baked-in magic numbers.

use serde::{Deserialize, Serialize};

/// Tunables for the orchestration engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Faults tolerated per agent before it is forced to `Failed`.
    /// Default: 3.
    pub retry_budget: u32,
    /// Extra attempts for a failed tool call, with the failure appended as
    /// context before the retry. Default: 1.
    pub tool_retry: u32,
    /// Base backoff applied before re-scheduling a faulted agent,
    /// multiplied by the agent's fault count. Zero disables backoff
    /// (tests). Default: 500 ms.
    pub backoff_base_ms: u64,
    /// Capacity of the bounded per-cycle event channel. Default: 64.
    pub event_channel_capacity: usize,
    /// Upper bound on concurrently running agent cycles. Default: 8.
    pub max_concurrent_cycles: usize,
    /// Children a Coordinator may own at once. Default: 8.
    pub max_projects: usize,
    /// Workers a ProjectManager may own at once. Default: 16.
    pub max_workers_per_manager: usize,
    /// Accept worker reports as soon as they arrive instead of waiting
    /// for an explicit `review_task` call from the manager agent.
    /// Default: true.
    pub auto_accept_reports: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            tool_retry: 1,
            backoff_base_ms: 500,
            event_channel_capacity: 64,
            max_concurrent_cycles: 8,
            max_projects: 8,
            max_workers_per_manager: 16,
            auto_accept_reports: true,
        }
    }
}

impl EngineConfig {
    /// Configuration suitable for deterministic tests: no backoff.
    pub fn for_tests() -> Self {
        Self { backoff_base_ms: 0, ..Self::default() }
    }

    pub(crate) fn backoff_for(&self, faults: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff_base_ms * u64::from(faults))
    }
}
