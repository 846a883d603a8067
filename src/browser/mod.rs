pub mod commands;
pub mod orchestrator;
pub mod port;
pub mod run;

pub use commands::{AgentCommand, AgentEvent, AgentMode, CommandAck, RpaRunConfig};
pub use orchestrator::{BrowserOrchestrator, DelegationOutcome};
pub use port::{AgentPort, ChannelState, PortChannel};
pub use run::{BrowserRun, RunEndReason, RunHistory, RunMessage, RunSource};
