//! Streaming chunk dispatcher.
//!
//! Decodes a chunked response body framed as `data: <json>\n\n` into
//! [`StreamChunk`]s and routes each to its handler. One malformed frame
//! never aborts the stream; only a failed read does.

use crate::approval::Proposal;
use crate::error::{AgentdeckError, Result};
use crate::questions::Question;
use crate::stream::chunk::StreamChunk;
use async_trait::async_trait;
use futures::{Stream, StreamExt};

/// Frame delimiter in the chat protocol.
const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Receives decoded chunks in arrival order. Handlers must stay cheap;
/// long side effects belong on spawned tasks because the next chunk is
/// not buffered behind a suspended handler's side effects.
#[async_trait]
pub trait ChunkHandler: Send + Sync {
    /// Called once per stream, before the first `text` or `tool_start`
    /// chunk is delivered. Streams that carry neither never open a turn.
    async fn open_turn(&self);

    async fn on_text(&self, content: &str);
    async fn on_tool_start(&self, tool_name: &str, args: &serde_json::Value);
    async fn on_tool_end(&self, tool_name: &str, result: &serde_json::Value);
    async fn on_tool_error(&self, tool_name: &str, error: &str);
    async fn on_proposal(&self, proposal: Proposal);
    async fn on_questions(&self, questions: Vec<Question>, context: Option<String>);
    async fn on_done(&self, session_id: &str);
    async fn on_error(&self, message: &str);

    /// Unrecognized chunk kinds are surfaced here after being logged.
    async fn on_unknown(&self, _raw: &serde_json::Value) {}
}

/// Incremental frame decoder. Buffers a trailing partial frame across
/// reads so a frame split between two network chunks is reassembled.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every completed frame body.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..pos + FRAME_DELIMITER.len()).collect();
            let text = String::from_utf8_lossy(&frame[..pos]);
            if let Some(body) = frame_body(&text) {
                frames.push(body);
            }
        }
        frames
    }

    /// Drain whatever is left in the buffer at end of stream. A final
    /// frame without a trailing delimiter is still decoded.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        frame_body(&String::from_utf8_lossy(&rest))
    }

    /// Bytes currently buffered as an incomplete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|w| w == FRAME_DELIMITER)
}

/// Strip the `data:` framing from one frame, joining continuation lines.
fn frame_body(frame: &str) -> Option<String> {
    let mut body = String::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(rest.trim_start());
        }
    }
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

/// Routes decoded chunks to a handler, tracking the lazy turn-open state
/// for one stream.
pub struct StreamDispatcher {
    decoder: FrameDecoder,
    turn_opened: bool,
}

impl Default for StreamDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDispatcher {
    pub fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            turn_opened: false,
        }
    }

    /// Consume a byte stream to completion. Returns the single terminal
    /// error on a failed read; per-frame decode problems are swallowed.
    pub async fn dispatch<S, B, E, H>(&mut self, stream: S, handler: &H) -> Result<()>
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
        H: ChunkHandler,
    {
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
            let bytes = item
                .map_err(|e| AgentdeckError::Transport(format!("chat stream read failed: {}", e)))?;
            for frame in self.decoder.push(bytes.as_ref()) {
                self.handle_frame(&frame, handler).await;
            }
        }

        if let Some(frame) = self.decoder.finish() {
            self.handle_frame(&frame, handler).await;
        }

        Ok(())
    }

    /// Feed bytes already read from elsewhere (tests, alternate transports).
    pub async fn feed<H: ChunkHandler>(&mut self, bytes: &[u8], handler: &H) {
        for frame in self.decoder.push(bytes) {
            self.handle_frame(&frame, handler).await;
        }
    }

    /// Bytes buffered as an incomplete trailing frame.
    pub fn pending_bytes(&self) -> usize {
        self.decoder.pending()
    }

    async fn handle_frame<H: ChunkHandler>(&mut self, frame: &str, handler: &H) {
        let value: serde_json::Value = match serde_json::from_str(frame) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Discarding malformed frame: {}", e);
                return;
            }
        };

        let chunk: StreamChunk = match serde_json::from_value(value.clone()) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("Discarding undecodable chunk: {}", e);
                return;
            }
        };

        match chunk {
            StreamChunk::Text { content } => {
                self.ensure_turn_open(handler).await;
                handler.on_text(&content).await;
            }
            StreamChunk::ToolStart { tool_name, args } => {
                self.ensure_turn_open(handler).await;
                handler.on_tool_start(&tool_name, &args).await;
            }
            StreamChunk::ToolEnd { tool_name, result } => {
                handler.on_tool_end(&tool_name, &result).await;
            }
            StreamChunk::ToolError { tool_name, error } => {
                handler.on_tool_error(&tool_name, &error).await;
            }
            StreamChunk::Proposal { proposal } => {
                handler.on_proposal(proposal).await;
            }
            StreamChunk::Questions { questions, context } => {
                handler.on_questions(questions, context).await;
            }
            StreamChunk::Done { session_id } => {
                handler.on_done(&session_id).await;
            }
            StreamChunk::Error { message } => {
                handler.on_error(&message).await;
            }
            StreamChunk::Unknown => {
                let kind = value
                    .get("chunk_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                tracing::info!("Unrecognized chunk kind: {}", kind);
                handler.on_unknown(&value).await;
            }
        }
    }

    async fn ensure_turn_open<H: ChunkHandler>(&mut self, handler: &H) {
        if !self.turn_opened {
            self.turn_opened = true;
            handler.open_turn().await;
        }
    }
}
