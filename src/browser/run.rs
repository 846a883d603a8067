//! Browser run lifecycle records.

use crate::skills::scenario::RpaScenario;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Finalized runs kept for inspection; oldest evicted first.
pub const MAX_RUN_HISTORY: usize = 20;

/// How a run came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    /// Started by the user from this client
    Manual,
    /// Requested by the AI backend (delegation)
    External,
    /// Scripted scenario with planner fallback
    HybridRpa,
    /// Adopted from a status report with no tracked run
    Recovered,
    /// Replayed from run history
    History,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEndReason {
    /// Agent reported not-running after having been running
    Stopped,
    /// Explicit stop command from the user
    UserStop,
    Completed,
    Failed,
    /// `agent.start` was not acknowledged ok
    StartFailed,
    /// `rpa.start` was not acknowledged ok
    RpaStartFailed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Screenshot,
    Status,
}

/// One entry in a run's chat log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMessage {
    pub role: MessageRole,
    pub text: String,
    #[serde(default)]
    pub kind: MessageKind,
    /// Base64 image payload for screenshot messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl RunMessage {
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            kind: MessageKind::Text,
            image: None,
        }
    }

    pub fn screenshot(image: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: String::new(),
            kind: MessageKind::Screenshot,
            image: Some(image.into()),
        }
    }
}

/// One lifecycle instance of browser-automation execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserRun {
    pub id: String,
    pub goal: String,
    pub source: RunSource,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub end_reason: Option<RunEndReason>,
    #[serde(default)]
    pub messages: Vec<RunMessage>,
    /// Scenario attached when the run started in hybrid-RPA mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<RpaScenario>,
}

impl BrowserRun {
    pub fn new(goal: impl Into<String>, source: RunSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            source,
            started_at: now_ms(),
            ended_at: None,
            end_reason: None,
            messages: Vec::new(),
            scenario: None,
        }
    }

    pub fn with_scenario(mut self, scenario: RpaScenario) -> Self {
        self.scenario = Some(scenario);
        self
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn push_message(&mut self, message: RunMessage) {
        self.messages.push(message);
    }

    pub fn finalize(&mut self, reason: RunEndReason) {
        if self.ended_at.is_none() {
            self.ended_at = Some(now_ms());
            self.end_reason = Some(reason);
        }
    }
}

/// Bounded store of finalized runs.
#[derive(Debug, Default)]
pub struct RunHistory {
    runs: VecDeque<BrowserRun>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, run: BrowserRun) {
        self.runs.push_back(run);
        while self.runs.len() > MAX_RUN_HISTORY {
            self.runs.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&BrowserRun> {
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BrowserRun> {
        self.runs.iter()
    }

    pub fn latest(&self) -> Option<&BrowserRun> {
        self.runs.back()
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
