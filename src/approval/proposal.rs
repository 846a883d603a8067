//! Proposal data structures.

use serde::{Deserialize, Serialize};

/// An AI-originated action awaiting human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique, stable id
    pub id: String,

    /// What kind of action is proposed
    #[serde(rename = "type")]
    pub kind: ProposalKind,

    /// Opaque structured data applied by the backend on approval
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Human-readable summary shown for approval
    #[serde(default)]
    pub description: String,

    /// Creation timestamp (Unix ms)
    #[serde(default)]
    pub created_at: u64,
}

/// Supported proposal kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    ToolAction,
    CreateTask,
    CreateProject,
    CreateWorkMemory,
    AssignTask,
    PhaseBreakdown,
}

/// Human decision over a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}
