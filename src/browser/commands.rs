//! Wire types for the execution-agent duplex channel.

use crate::config::AiConfig;
use crate::skills::scenario::RpaScenario;
use serde::{Deserialize, Serialize};

/// Outbound commands. Every command receives exactly one [`CommandAck`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentCommand {
    /// Start an autonomous run for a free-text goal.
    #[serde(rename = "agent.start")]
    AgentStart { goal: String, config: AiConfig },

    /// Route an instruction into the already-active run.
    #[serde(rename = "agent.instruction")]
    AgentInstruction { text: String },

    /// Stop the active run.
    #[serde(rename = "agent.stop")]
    AgentStop,

    /// Start a scripted scenario with planner fallback.
    #[serde(rename = "rpa.start")]
    RpaStart {
        goal: String,
        scenario: RpaScenario,
        config: RpaRunConfig,
    },

    /// Begin recording user actions into a new scenario.
    #[serde(rename = "rpa.record.start")]
    RecordStart { scenario_name: String },

    /// Stop recording, optionally persisting the result as a skill.
    #[serde(rename = "rpa.record.stop")]
    RecordStop { save_as_skill: bool },

    /// Ask the agent to propose a title/tags for a skill draft.
    #[serde(rename = "skill.suggest_metadata")]
    SuggestSkillMetadata { config: AiConfig, draft: String },
}

/// Execution policy accompanying an `rpa.start` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpaRunConfig {
    pub ai_fallback: bool,
    pub ai_fallback_max_steps: u32,
    pub step_retry_limit: u32,
    pub stop_on_failure: bool,
    /// Free-text notes for the agent, including the matched skill id.
    #[serde(default)]
    pub notes: String,
}

impl RpaRunConfig {
    pub fn from_scenario(scenario: &RpaScenario, notes: String) -> Self {
        Self {
            ai_fallback: scenario.ai_fallback,
            ai_fallback_max_steps: scenario.ai_fallback_max_steps,
            step_retry_limit: scenario.step_retry_limit,
            stop_on_failure: scenario.stop_on_failure,
            notes,
        }
    }
}

/// Single success/failure acknowledgement for one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAck {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Execution mode the agent reports in status updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Autonomous,
    HybridRpa,
    Recording,
}

/// One message of a replayed chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Inbound events from the execution agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Periodic run status; drives the local run lifecycle.
    #[serde(rename = "agent.status")]
    Status {
        running: bool,
        #[serde(default)]
        step: u32,
        #[serde(default)]
        mode: AgentMode,
    },

    /// One chat-log entry from the running agent.
    #[serde(rename = "chat.message")]
    ChatMessage {
        role: String,
        text: String,
        #[serde(default)]
        meta: serde_json::Value,
    },

    /// Full chat-log replay after a reconnect.
    #[serde(rename = "chat.history")]
    ChatHistory { messages: Vec<HistoryMessage> },

    /// The agent wants a human in the loop before continuing.
    #[serde(rename = "approval.requested")]
    ApprovalRequested,
}
