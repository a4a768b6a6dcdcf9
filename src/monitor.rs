//! Compliance monitor seam
//!
//! Every proposed `FinalResponse` and `ToolRequested` passes through the
//! monitor before its side effect is applied. The rule logic itself is an
//! external collaborator; this module fixes the call contract and ships a
//! permissive default.

use crate::protocol::{AgentId, AgentRole, Proposal, Verdict};

/// Reviews proposed agent output against policy
pub trait ComplianceMonitor: Send + Sync {
    fn review(&self, agent: AgentId, role: AgentRole, proposal: &Proposal) -> Verdict;
}

/// Default monitor: everything is allowed
pub struct AllowAll;

impl ComplianceMonitor for AllowAll {
    fn review(&self, _agent: AgentId, _role: AgentRole, _proposal: &Proposal) -> Verdict {
        Verdict::Allow
    }
}

/// Monitor that matches proposal text against a deny list. Useful as a
/// minimal real policy and for tests; remediates on the first hit when
/// guidance is configured, blocks otherwise.
pub struct DenyList {
    patterns: Vec<String>,
    guidance: Option<String>,
}

impl DenyList {
    pub fn blocking(patterns: Vec<String>) -> Self {
        Self { patterns, guidance: None }
    }

    pub fn remediating(patterns: Vec<String>, guidance: impl Into<String>) -> Self {
        Self { patterns, guidance: Some(guidance.into()) }
    }

    fn matches(&self, text: &str) -> Option<&str> {
        self.patterns.iter().map(String::as_str).find(|p| text.contains(*p))
    }
}

impl ComplianceMonitor for DenyList {
    fn review(&self, _agent: AgentId, _role: AgentRole, proposal: &Proposal) -> Verdict {
        let text = match proposal {
            Proposal::Response { text } => text.clone(),
            Proposal::ToolCall { name, arguments } => format!("{name} {arguments}"),
        };
        match self.matches(&text) {
            None => Verdict::Allow,
            Some(pattern) => match &self.guidance {
                Some(guidance) => Verdict::Remediate { guidance: guidance.clone() },
                None => Verdict::Block { reason: format!("matched denied pattern '{pattern}'") },
            },
        }
    }
}
