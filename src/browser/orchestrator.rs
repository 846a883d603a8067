//! Browser delegation orchestrator.
//!
//! Owns the single active [`BrowserRun`] and decides whether a requested
//! goal runs as a scripted hybrid-RPA scenario or falls back to the
//! autonomous planner. Status reports from the execution agent drive the
//! run lifecycle; a run is never left "running" after a failure.

use crate::browser::commands::{AgentCommand, AgentEvent, AgentMode, RpaRunConfig};
use crate::browser::port::AgentPort;
use crate::browser::run::{
    BrowserRun, MessageKind, MessageRole, RunEndReason, RunHistory, RunMessage, RunSource,
};
use crate::config::AppConfig;
use crate::error::{AgentdeckError, Result};
use crate::skills::compiler::{self, SkillDraft};
use crate::skills::matcher::{SkillMatch, SkillMatcher};
use crate::skills::scenario::RpaScenario;
use crate::skills::SkillSink;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// What a delegation request turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationOutcome {
    /// A scripted scenario was matched and started.
    HybridRpa { run_id: String, skill_id: String },
    /// No usable skill; the autonomous planner took the goal.
    Autonomous { run_id: String },
    /// A run was already active; the goal was routed into it.
    Instruction,
}

#[derive(Default)]
struct OrchestratorState {
    current: Option<BrowserRun>,
    /// The agent has reported `running=true` for the current run.
    running_seen: bool,
    last_step: u32,
    last_mode: AgentMode,
    history: RunHistory,
    /// Name of the scenario being recorded, when recording.
    recording: Option<String>,
    /// The agent asked for a human in the loop.
    approval_requested: bool,
}

pub struct BrowserOrchestrator {
    port: Arc<dyn AgentPort>,
    matcher: SkillMatcher,
    config: Arc<RwLock<AppConfig>>,
    state: Mutex<OrchestratorState>,
}

impl BrowserOrchestrator {
    pub fn new(
        port: Arc<dyn AgentPort>,
        matcher: SkillMatcher,
        config: Arc<RwLock<AppConfig>>,
    ) -> Self {
        Self {
            port,
            matcher,
            config,
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    /// Handle a delegation request for a free-text goal.
    ///
    /// An active run receives the goal as an in-place instruction; only one
    /// run may be active at a time. Otherwise the skill library is
    /// consulted: a match starts a hybrid-RPA scenario, a miss starts the
    /// autonomous planner.
    pub async fn delegate(&self, goal: &str, source: RunSource) -> Result<DelegationOutcome> {
        if self.has_active_run() {
            return self.instruct(goal).await.map(|_| DelegationOutcome::Instruction);
        }

        let matched = match self.matcher.find_best(goal).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Skill lookup failed, falling back to planner: {}", e);
                None
            }
        };

        match matched {
            Some(skill) => self.start_hybrid(goal, skill).await,
            None => self.start_autonomous(goal, source).await,
        }
    }

    /// Route an instruction into the active run.
    pub async fn instruct(&self, text: &str) -> Result<()> {
        let ack = self
            .port
            .send(AgentCommand::AgentInstruction {
                text: text.to_string(),
            })
            .await?;
        if !ack.ok {
            return Err(AgentdeckError::Agent(
                ack.error.unwrap_or_else(|| "instruction rejected".to_string()),
            ));
        }
        let mut state = self.state.lock();
        if let Some(run) = state.current.as_mut() {
            run.push_message(RunMessage::text(MessageRole::User, text));
        }
        Ok(())
    }

    async fn start_hybrid(&self, goal: &str, skill: SkillMatch) -> Result<DelegationOutcome> {
        skill.scenario.validate()?;
        tracing::info!(
            "Starting hybrid RPA run: skill={} steps={}",
            skill.entry_id,
            skill.scenario.steps.len()
        );

        let run = BrowserRun::new(goal, RunSource::HybridRpa).with_scenario(skill.scenario.clone());
        let run_id = run.id.clone();
        self.track_new_run(run);

        let notes = format!("Matched skill {}", skill.entry_id);
        let config = RpaRunConfig::from_scenario(&skill.scenario, notes);
        let ack = self
            .port
            .send(AgentCommand::RpaStart {
                goal: goal.to_string(),
                scenario: skill.scenario,
                config,
            })
            .await;

        match ack {
            Ok(ack) if ack.ok => Ok(DelegationOutcome::HybridRpa {
                run_id,
                skill_id: skill.entry_id,
            }),
            Ok(ack) => {
                self.finalize_current(RunEndReason::RpaStartFailed);
                Err(AgentdeckError::Agent(
                    ack.error.unwrap_or_else(|| "rpa.start rejected".to_string()),
                ))
            }
            Err(e) => {
                self.finalize_current(RunEndReason::RpaStartFailed);
                Err(e)
            }
        }
    }

    async fn start_autonomous(&self, goal: &str, source: RunSource) -> Result<DelegationOutcome> {
        tracing::info!("Starting autonomous run for goal: {}", goal);
        let run = BrowserRun::new(goal, source);
        let run_id = run.id.clone();
        self.track_new_run(run);

        let ai = self.config.read().ai.clone();
        let ack = self
            .port
            .send(AgentCommand::AgentStart {
                goal: goal.to_string(),
                config: ai,
            })
            .await;

        match ack {
            Ok(ack) if ack.ok => Ok(DelegationOutcome::Autonomous { run_id }),
            Ok(ack) => {
                self.finalize_current(RunEndReason::StartFailed);
                Err(AgentdeckError::Agent(
                    ack.error.unwrap_or_else(|| "agent.start rejected".to_string()),
                ))
            }
            Err(e) => {
                self.finalize_current(RunEndReason::StartFailed);
                Err(e)
            }
        }
    }

    /// Stop the active run. Local state finalizes only once the stop is
    /// acknowledged; the run stays tracked if the command fails.
    pub async fn stop(&self) -> Result<()> {
        if !self.has_current_run() {
            return Ok(());
        }
        let ack = self.port.send(AgentCommand::AgentStop).await?;
        if !ack.ok {
            return Err(AgentdeckError::Agent(
                ack.error.unwrap_or_else(|| "agent.stop rejected".to_string()),
            ));
        }
        self.finalize_current(RunEndReason::UserStop);
        Ok(())
    }

    /// Apply one inbound agent event to the tracked run.
    pub fn handle_event(&self, event: AgentEvent) {
        match event {
            AgentEvent::Status {
                running,
                step,
                mode,
            } => self.handle_status(running, step, mode),
            AgentEvent::ChatMessage { role, text, meta } => {
                let mut state = self.state.lock();
                if let Some(run) = state.current.as_mut() {
                    run.push_message(chat_message_to_run_message(&role, &text, &meta));
                }
            }
            AgentEvent::ChatHistory { messages } => {
                let mut state = self.state.lock();
                if let Some(run) = state.current.as_mut() {
                    run.messages = messages
                        .iter()
                        .map(|m| chat_message_to_run_message(
                            &m.role,
                            &m.text,
                            &serde_json::json!({ "kind": m.kind, "image": m.image }),
                        ))
                        .collect();
                }
            }
            AgentEvent::ApprovalRequested => {
                tracing::info!("Execution agent requested approval");
                self.state.lock().approval_requested = true;
            }
        }
    }

    /// Status transitions drive the run lifecycle. `running=true` with no
    /// tracked run adopts one (recovery); `running=false` after running
    /// finalizes with reason `stopped`.
    pub fn handle_status(&self, running: bool, step: u32, mode: AgentMode) {
        let mut state = self.state.lock();
        state.last_mode = mode;

        if running {
            if state.current.is_none() {
                tracing::info!("Status reports a run in progress with none tracked, recovering");
                state.current = Some(BrowserRun::new("", RunSource::Recovered));
            }
            state.running_seen = true;
            state.last_step = step;
        } else if state.running_seen {
            if let Some(mut run) = state.current.take() {
                tracing::info!("Run {} finished (stopped)", run.id);
                run.finalize(RunEndReason::Stopped);
                state.history.push(run);
            }
            state.running_seen = false;
            state.last_step = 0;
        }
    }

    /// Start recording a new scenario under the given name.
    pub async fn record_start(&self, scenario_name: &str) -> Result<()> {
        let ack = self
            .port
            .send(AgentCommand::RecordStart {
                scenario_name: scenario_name.to_string(),
            })
            .await?;
        if !ack.ok {
            return Err(AgentdeckError::Agent(
                ack.error.unwrap_or_else(|| "rpa.record.start rejected".to_string()),
            ));
        }
        self.state.lock().recording = Some(scenario_name.to_string());
        Ok(())
    }

    /// Stop recording. With `save_as_skill` the agent persists the
    /// recording on its side and we mirror the intent in the library via
    /// [`Self::save_scenario_as_skill`] once the scenario is delivered.
    pub async fn record_stop(&self, save_as_skill: bool) -> Result<()> {
        let ack = self
            .port
            .send(AgentCommand::RecordStop { save_as_skill })
            .await?;
        if !ack.ok {
            return Err(AgentdeckError::Agent(
                ack.error.unwrap_or_else(|| "rpa.record.stop rejected".to_string()),
            ));
        }
        self.state.lock().recording = None;
        Ok(())
    }

    /// Compile a finished run into a skill document and persist it.
    pub async fn save_run_as_skill(&self, run_id: &str, sink: &dyn SkillSink) -> Result<String> {
        let run = {
            let state = self.state.lock();
            state
                .history
                .get(run_id)
                .cloned()
                .or_else(|| state.current.as_ref().filter(|r| r.id == run_id).cloned())
        }
        .ok_or_else(|| AgentdeckError::Validation(format!("No run with id {}", run_id)))?;

        let draft = SkillDraft::from_run(&run);
        self.persist_draft(draft, "run", sink).await
    }

    /// Compile a freshly recorded scenario into a skill document and
    /// persist it.
    pub async fn save_scenario_as_skill(
        &self,
        scenario: RpaScenario,
        goal: &str,
        sink: &dyn SkillSink,
    ) -> Result<String> {
        scenario.validate()?;
        let draft = SkillDraft::from_scenario(scenario, goal);
        self.persist_draft(draft, "recording", sink).await
    }

    async fn persist_draft(
        &self,
        draft: SkillDraft,
        source: &str,
        sink: &dyn SkillSink,
    ) -> Result<String> {
        let document = compiler::compile(&draft);

        // Metadata suggestion is best-effort; the local title stands when
        // the agent cannot improve on it.
        let ai = self.config.read().ai.clone();
        match self
            .port
            .send(AgentCommand::SuggestSkillMetadata {
                config: ai,
                draft: document.clone(),
            })
            .await
        {
            Ok(ack) if ack.ok => {}
            Ok(ack) => {
                tracing::debug!(
                    "Skill metadata suggestion rejected: {}",
                    ack.error.unwrap_or_default()
                )
            }
            Err(e) => tracing::debug!("Skill metadata suggestion failed: {}", e),
        }

        let workspace_id = self.config.read().backend.workspace_id.clone();
        sink.persist_skill(&document, &workspace_id, &["skill".to_string()], source)
            .await
    }

    pub fn current_run(&self) -> Option<BrowserRun> {
        self.state.lock().current.clone()
    }

    pub fn history_runs(&self) -> Vec<BrowserRun> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn recording_name(&self) -> Option<String> {
        self.state.lock().recording.clone()
    }

    /// Take the approval-requested flag, resetting it.
    pub fn take_approval_request(&self) -> bool {
        std::mem::take(&mut self.state.lock().approval_requested)
    }

    pub fn last_step(&self) -> u32 {
        self.state.lock().last_step
    }

    pub fn last_mode(&self) -> AgentMode {
        self.state.lock().last_mode
    }

    fn has_current_run(&self) -> bool {
        self.state.lock().current.is_some()
    }

    fn has_active_run(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|r| r.is_active())
            .unwrap_or(false)
    }

    fn track_new_run(&self, run: BrowserRun) {
        let mut state = self.state.lock();
        state.current = Some(run);
        state.running_seen = false;
        state.last_step = 0;
    }

    fn finalize_current(&self, reason: RunEndReason) {
        let mut state = self.state.lock();
        if let Some(mut run) = state.current.take() {
            run.finalize(reason);
            state.history.push(run);
        }
        state.running_seen = false;
    }
}

fn chat_message_to_run_message(role: &str, text: &str, meta: &serde_json::Value) -> RunMessage {
    let role = match role {
        "user" => MessageRole::User,
        "system" => MessageRole::System,
        "tool" => MessageRole::Tool,
        _ => MessageRole::Assistant,
    };
    let kind = match meta.get("kind").and_then(|v| v.as_str()) {
        Some("screenshot") => MessageKind::Screenshot,
        Some("status") => MessageKind::Status,
        _ => MessageKind::Text,
    };
    RunMessage {
        role,
        text: text.to_string(),
        kind,
        image: meta.get("image").and_then(|v| v.as_str()).map(String::from),
    }
}
