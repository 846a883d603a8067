//! Duplex channel to the execution agent.
//!
//! A persistent WebSocket client with an explicit connection state machine
//! (disconnected → connecting → connected). Commands are acknowledged
//! exactly once; events fan out over a broadcast channel. On disconnect the
//! channel reconnects after a fixed delay; in-flight acks fail, nothing is
//! replayed.

use crate::browser::commands::{AgentCommand, AgentEvent, CommandAck};
use crate::error::{AgentdeckError, Result};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// A command whose ack has not arrived by then resolves as failed.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Events buffered per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Commands queued while the link is down.
const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Connection lifecycle of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Command/event surface of the execution agent, mockable in tests.
#[async_trait]
pub trait AgentPort: Send + Sync {
    /// Send one command and await its single acknowledgement.
    async fn send(&self, command: AgentCommand) -> Result<CommandAck>;

    /// Subscribe to inbound agent events.
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;
}

struct OutboundCommand {
    id: String,
    command: AgentCommand,
    ack: oneshot::Sender<CommandAck>,
}

/// WebSocket-backed [`AgentPort`].
pub struct PortChannel {
    state: Arc<Mutex<ChannelState>>,
    events_tx: broadcast::Sender<AgentEvent>,
    outbound_tx: mpsc::Sender<OutboundCommand>,
}

impl PortChannel {
    /// Spawn the connection task and return the channel handle. The task
    /// runs until the handle (and its outbound queue) is dropped.
    pub fn connect(url: String) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let state = Arc::new(Mutex::new(ChannelState::Disconnected));

        let channel = Arc::new(Self {
            state: state.clone(),
            events_tx: events_tx.clone(),
            outbound_tx,
        });

        tokio::spawn(run_channel(url, state, events_tx, outbound_rx));
        channel
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }
}

#[async_trait]
impl AgentPort for PortChannel {
    async fn send(&self, command: AgentCommand) -> Result<CommandAck> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let outbound = OutboundCommand {
            id: uuid::Uuid::new_v4().to_string(),
            command,
            ack: ack_tx,
        };
        self.outbound_tx
            .send(outbound)
            .await
            .map_err(|_| AgentdeckError::Transport("agent channel closed".to_string()))?;

        match tokio::time::timeout(ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Ok(CommandAck::failure(
                "channel disconnected before acknowledgement",
            )),
            Err(_) => Ok(CommandAck::failure("acknowledgement timed out")),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events_tx.subscribe()
    }
}

enum SessionExit {
    /// Socket closed or errored; reconnect.
    Lost,
    /// Handle dropped; shut the task down.
    HandleDropped,
}

async fn run_channel(
    url: String,
    state: Arc<Mutex<ChannelState>>,
    events_tx: broadcast::Sender<AgentEvent>,
    mut outbound_rx: mpsc::Receiver<OutboundCommand>,
) {
    loop {
        *state.lock() = ChannelState::Connecting;
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                tracing::info!("Agent gateway connected: {}", url);
                *state.lock() = ChannelState::Connected;
                if let SessionExit::HandleDropped =
                    run_session(ws, &events_tx, &mut outbound_rx).await
                {
                    return;
                }
                tracing::warn!("Agent gateway disconnected");
            }
            Err(e) => {
                tracing::warn!("Agent gateway connect failed: {}", e);
            }
        }
        *state.lock() = ChannelState::Disconnected;
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn run_session<W>(
    ws: W,
    events_tx: &broadcast::Sender<AgentEvent>,
    outbound_rx: &mut mpsc::Receiver<OutboundCommand>,
) -> SessionExit
where
    W: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut pending: HashMap<String, oneshot::Sender<CommandAck>> = HashMap::new();
    let exit;

    loop {
        tokio::select! {
            // Queued commands flush before the next inbound frame is read.
            biased;

            maybe_cmd = outbound_rx.recv() => {
                let Some(outbound) = maybe_cmd else {
                    exit = SessionExit::HandleDropped;
                    break;
                };
                let frame = command_frame(&outbound.id, &outbound.command);
                match sink.send(Message::Text(frame)).await {
                    Ok(()) => {
                        pending.insert(outbound.id, outbound.ack);
                    }
                    Err(e) => {
                        let _ = outbound
                            .ack
                            .send(CommandAck::failure(format!("send failed: {}", e)));
                        exit = SessionExit::Lost;
                        break;
                    }
                }
            }
            maybe_msg = stream.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&text, &mut pending, events_tx);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        exit = SessionExit::Lost;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("Agent gateway read error: {}", e);
                        exit = SessionExit::Lost;
                        break;
                    }
                }
            }
        }
    }

    // Pending commands were delivered at most once; their acks fail now.
    for (_, ack) in pending.drain() {
        let _ = ack.send(CommandAck::failure("channel disconnected"));
    }
    exit
}

fn command_frame(id: &str, command: &AgentCommand) -> String {
    let mut value = serde_json::to_value(command).unwrap_or(serde_json::Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    }
    value.to_string()
}

/// One inbound frame: an ack (`{id, ok, error?}`) resolves its waiter,
/// anything else is decoded as an event. Undecodable frames are dropped.
fn handle_inbound(
    text: &str,
    pending: &mut HashMap<String, oneshot::Sender<CommandAck>>,
    events_tx: &broadcast::Sender<AgentEvent>,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Dropping malformed gateway frame: {}", e);
            return;
        }
    };

    let ack_id = value.get("id").and_then(|v| v.as_str());
    let ack_ok = value.get("ok").and_then(|v| v.as_bool());
    if let (Some(id), Some(ok)) = (ack_id, ack_ok) {
        match pending.remove(id) {
            Some(waiter) => {
                let _ = waiter.send(CommandAck {
                    ok,
                    error: value
                        .get("error")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                });
            }
            None => tracing::debug!("Ack for unknown command id {}", id),
        }
        return;
    }

    match serde_json::from_value::<AgentEvent>(value) {
        Ok(event) => {
            let _ = events_tx.send(event);
        }
        Err(e) => tracing::debug!("Dropping undecodable gateway event: {}", e),
    }
}
