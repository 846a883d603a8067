//! Chat protocol chunk types.

use crate::approval::Proposal;
use crate::questions::Question;
use serde::{Deserialize, Serialize};

/// One discrete unit of the streamed chat protocol. Wire frames carry a
/// `chunk_type` discriminator; each kind has exactly one payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "chunk_type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental assistant text delta
    Text { content: String },

    /// A tool invocation began
    ToolStart {
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },

    /// A tool invocation finished with a result payload
    ToolEnd {
        tool_name: String,
        #[serde(default)]
        result: serde_json::Value,
    },

    /// A tool invocation failed
    ToolError {
        tool_name: String,
        #[serde(default)]
        error: String,
    },

    /// The AI proposes an action that needs human approval
    Proposal { proposal: Proposal },

    /// The AI needs structured answers before continuing
    Questions {
        #[serde(default)]
        questions: Vec<Question>,
        #[serde(default)]
        context: Option<String>,
    },

    /// Terminal marker carrying the session id for the next request.
    /// Does not terminate the byte stream by itself.
    Done { session_id: String },

    /// Backend-reported error for this turn
    Error {
        #[serde(default)]
        message: String,
    },

    /// Any chunk kind this client does not recognize. Logged, never fatal.
    #[serde(other)]
    Unknown,
}
