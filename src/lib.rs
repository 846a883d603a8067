pub mod api;
pub mod approval;
pub mod auth;
pub mod browser;
pub mod chat;
pub mod config;
pub mod error;
pub mod questions;
pub mod skills;
pub mod state;
pub mod stream;

use crate::api::BackendClient;
use crate::approval::{DecideTarget, Decision};
use crate::auth::tabs::{NoTabAccess, TabProvider};
use crate::auth::AuthTokenResolver;
use crate::browser::port::AgentPort;
use crate::browser::{BrowserOrchestrator, PortChannel};
use crate::chat::ChatSession;
use crate::skills::SkillMatcher;
use crate::state::AppState;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;

/// Everything the host drives after bootstrap.
pub struct Runtime {
    pub state: AppState,
    pub client: Arc<BackendClient>,
    pub orchestrator: Arc<BrowserOrchestrator>,
    pub session: Arc<ChatSession<BackendClient>>,
    pub port: Arc<PortChannel>,
}

/// Wire the orchestration layer together. Must run inside a tokio
/// runtime: the port channel and its event pump are spawned here.
pub fn bootstrap(config: config::AppConfig, tabs: Arc<dyn TabProvider>) -> Runtime {
    let state = AppState::new(config);

    let resolver = Arc::new(AuthTokenResolver::new(state.token_cache.clone(), tabs));
    let client = Arc::new(BackendClient::new(state.config.clone(), resolver));

    let gateway_url = state.config.read().gateway.url.clone();
    let port = PortChannel::connect(gateway_url);

    let workspace_id = state.config.read().backend.workspace_id.clone();
    let matcher = SkillMatcher::new(client.clone(), workspace_id);
    let orchestrator = Arc::new(BrowserOrchestrator::new(
        port.clone(),
        matcher,
        state.config.clone(),
    ));

    let session = Arc::new(ChatSession::new(
        state.proposals.clone(),
        state.questions.clone(),
        orchestrator.clone(),
        client.clone(),
        state.config.clone(),
    ));

    spawn_event_pump(port.clone(), orchestrator.clone());

    Runtime {
        state,
        client,
        orchestrator,
        session,
        port,
    }
}

/// Forward inbound agent events into the orchestrator until the port
/// channel goes away.
fn spawn_event_pump(port: Arc<PortChannel>, orchestrator: Arc<BrowserOrchestrator>) {
    let mut events = port.subscribe();
    tokio::spawn(async move {
        // Holding `port` keeps the broadcast sender alive for this pump.
        let _port = port;
        loop {
            match events.recv().await {
                Ok(event) => orchestrator.handle_event(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Agent event pump lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

pub fn run() -> anyhow::Result<()> {
    use anyhow::Context;

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration (never overwrite existing file on failure)
    let config = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(
                "Failed to load config: {}. Using in-memory defaults (not saving).",
                e
            );
            config::AppConfig::default()
        }
    };
    if let Err(e) = config::validate_config(&config) {
        tracing::warn!("Config validation: {}", e);
    }

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(async move {
        let runtime = bootstrap(config, Arc::new(NoTabAccess));
        repl(runtime).await;
    });
    Ok(())
}

/// Minimal console driver: plain lines go to the chat backend, slash
/// commands drive approvals, questions, and the browser agent.
async fn repl(runtime: Runtime) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    println!("agentdeck ready. /help for commands.");
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match line.as_str() {
            "/quit" => break,
            "/help" => {
                println!(
                    "/approve /reject /pending /answers /cancel /stop /status /runs /record <name> /record-stop [--save] /quit"
                );
            }
            "/approve" | "/reject" => {
                let decision = if line == "/approve" {
                    Decision::Approve
                } else {
                    Decision::Reject
                };
                match runtime.session.decide(DecideTarget::All, decision).await {
                    Ok(()) => println!("done, {} queued", runtime.state.proposals.len()),
                    Err(e) => println!("decision failed: {}", e),
                }
            }
            "/pending" => match runtime.session.refresh_pending().await {
                Ok(added) => println!("{} new, {} queued", added, runtime.state.proposals.len()),
                Err(e) => println!("refresh failed: {}", e),
            },
            "/answers" => match runtime.session.submit_answers().await {
                Ok(()) => println!("answers sent"),
                Err(e) => println!("cannot submit: {}", e),
            },
            "/cancel" => {
                runtime.session.cancel_questions();
                println!("question set discarded");
            }
            "/stop" => match runtime.orchestrator.stop().await {
                Ok(()) => println!("stopped"),
                Err(e) => println!("stop failed: {}", e),
            },
            "/status" => {
                println!("gateway: {:?}", runtime.port.state());
                match runtime.orchestrator.current_run() {
                    Some(run) => println!(
                        "run {} ({:?}) step {} mode {:?}: {}",
                        run.id,
                        run.source,
                        runtime.orchestrator.last_step(),
                        runtime.orchestrator.last_mode(),
                        run.goal
                    ),
                    None => println!("no active run"),
                }
            }
            "/runs" => {
                for run in runtime.orchestrator.history_runs() {
                    println!(
                        "{}  {:?}  {:?}  {}",
                        run.id, run.source, run.end_reason, run.goal
                    );
                }
            }
            "/record-stop" | "/record-stop --save" => {
                let save = line.ends_with("--save");
                match runtime.orchestrator.record_stop(save).await {
                    Ok(()) => println!("recording stopped"),
                    Err(e) => println!("record stop failed: {}", e),
                }
            }
            _ if line.starts_with("/record ") => {
                let name = line.trim_start_matches("/record ").trim();
                match runtime.orchestrator.record_start(name).await {
                    Ok(()) => println!("recording '{}'", name),
                    Err(e) => println!("record start failed: {}", e),
                }
            }
            _ => {
                match runtime.client.stream_chat(&line, runtime.session.as_ref()).await {
                    Ok(()) => {
                        runtime.session.set_offline(false);
                        if let Some(text) = runtime.session.take_turn_text() {
                            println!("{}", text);
                        }
                        if let Some(error) = runtime.session.take_last_error() {
                            println!("backend error: {}", error);
                        }
                        let queued = runtime.state.proposals.len();
                        if queued > 0 {
                            println!("{} proposals awaiting /approve or /reject", queued);
                        }
                        if runtime.state.questions.is_active() {
                            println!("questions pending; answer and /answers");
                        }
                    }
                    Err(e) if matches!(e, error::AgentdeckError::Transport(_)) => {
                        runtime.session.set_offline(true);
                        println!("offline: {}", e);
                    }
                    Err(e) => println!("request failed: {}", e),
                }
            }
        }
    }
}
