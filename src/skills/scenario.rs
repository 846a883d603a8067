//! RPA scenario data structures and serialization.

use crate::error::{AgentdeckError, Result};
use serde::{Deserialize, Serialize};

/// Hard cap on scenario length.
pub const MAX_SCENARIO_STEPS: usize = 40;

/// A scripted browser scenario: an ordered list of typed steps with
/// fallback and retry policy. Executed by the agent in hybrid-RPA mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpaScenario {
    pub name: String,

    /// Where execution begins. Empty means "current page".
    #[serde(default)]
    pub start_url: String,

    pub steps: Vec<RpaStep>,

    /// Let the autonomous planner take over when a step keeps failing.
    #[serde(default = "default_true")]
    pub ai_fallback: bool,

    /// Planner step budget once fallback is active.
    #[serde(default = "default_ai_fallback_max_steps")]
    pub ai_fallback_max_steps: u32,

    /// Retries per scripted step before it counts as failed.
    #[serde(default = "default_step_retry_limit")]
    pub step_retry_limit: u32,

    /// Abort the scenario on the first failed step instead of skipping it.
    #[serde(default)]
    pub stop_on_failure: bool,
}

fn default_true() -> bool {
    true
}

fn default_ai_fallback_max_steps() -> u32 {
    15
}

fn default_step_retry_limit() -> u32 {
    2
}

impl RpaScenario {
    /// Structural validation before a scenario is sent to the agent.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AgentdeckError::Validation(
                "Scenario name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(AgentdeckError::Validation(
                "Scenario must contain at least one step".to_string(),
            ));
        }
        if self.steps.len() > MAX_SCENARIO_STEPS {
            return Err(AgentdeckError::Validation(format!(
                "Scenario has {} steps, maximum is {}",
                self.steps.len(),
                MAX_SCENARIO_STEPS
            )));
        }
        Ok(())
    }
}

/// One scripted step. Each variant carries only the fields relevant to
/// its tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpaStep {
    Navigate {
        url: String,
    },
    NewTab {
        #[serde(default)]
        url: Option<String>,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        #[serde(default = "default_scroll_amount")]
        amount: u32,
    },
    Wait {
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        selector: Option<String>,
    },
    Keypress {
        key: String,
    },
    AssertText {
        text: String,
    },
    AssertUrl {
        pattern: String,
    },
    /// Hand one sub-goal to the autonomous planner mid-scenario.
    Ai {
        instruction: String,
        #[serde(default)]
        max_steps: Option<u32>,
    },
}

fn default_scroll_amount() -> u32 {
    300
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Left,
    Right,
}
