// Integration tests for the streaming chunk dispatcher

use agentdeck_lib::approval::Proposal;
use agentdeck_lib::questions::Question;
use agentdeck_lib::stream::{ChunkHandler, StreamDispatcher};
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Default)]
struct CollectingHandler {
    opened: Mutex<u32>,
    text: Mutex<String>,
    proposals: Mutex<Vec<Proposal>>,
    questions: Mutex<Vec<Question>>,
    done_sessions: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

#[async_trait]
impl ChunkHandler for CollectingHandler {
    async fn open_turn(&self) {
        *self.opened.lock() += 1;
    }

    async fn on_text(&self, content: &str) {
        self.text.lock().push_str(content);
    }

    async fn on_tool_start(&self, _tool_name: &str, _args: &serde_json::Value) {}

    async fn on_tool_end(&self, _tool_name: &str, _result: &serde_json::Value) {}

    async fn on_tool_error(&self, _tool_name: &str, _error: &str) {}

    async fn on_proposal(&self, proposal: Proposal) {
        self.proposals.lock().push(proposal);
    }

    async fn on_questions(&self, questions: Vec<Question>, _context: Option<String>) {
        self.questions.lock().extend(questions);
    }

    async fn on_done(&self, session_id: &str) {
        self.done_sessions.lock().push(session_id.to_string());
    }

    async fn on_error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

/// A complete frame followed by an unterminated partial frame: the text
/// delta is emitted, the remainder stays buffered for the next read.
#[tokio::test]
async fn test_text_then_partial_frame_buffers_remainder() {
    let handler = CollectingHandler::default();
    let mut dispatcher = StreamDispatcher::new();

    dispatcher
        .feed(
            b"data: {\"chunk_type\":\"text\",\"content\":\"Hi\"}\n\ndata: {\"chunk_type\":\"te",
            &handler,
        )
        .await;

    assert_eq!(*handler.text.lock(), "Hi");
    assert_eq!(*handler.opened.lock(), 1);
    assert!(dispatcher.pending_bytes() > 0);

    dispatcher
        .feed(b"xt\",\"content\":\"!\"}\n\n", &handler)
        .await;
    assert_eq!(*handler.text.lock(), "Hi!");
    assert_eq!(dispatcher.pending_bytes(), 0);
    // Same stream: the turn opened exactly once.
    assert_eq!(*handler.opened.lock(), 1);
}

#[tokio::test]
async fn test_mixed_stream_routes_every_chunk_kind() {
    let handler = CollectingHandler::default();
    let mut dispatcher = StreamDispatcher::new();

    let stream = concat!(
        "data: {\"chunk_type\":\"text\",\"content\":\"Working on it. \"}\n\n",
        "data: {\"chunk_type\":\"tool_start\",\"tool_name\":\"search\"}\n\n",
        "data: {\"chunk_type\":\"tool_end\",\"tool_name\":\"search\",\"result\":{\"hits\":2}}\n\n",
        "data: {\"chunk_type\":\"proposal\",\"proposal\":{\"id\":\"p1\",\"type\":\"create_task\",\"description\":\"Create task\"}}\n\n",
        "data: {\"chunk_type\":\"questions\",\"questions\":[{\"id\":\"q1\",\"text\":\"Which project?\"}]}\n\n",
        "data: {\"chunk_type\":\"telemetry\",\"n\":1}\n\n",
        "data: {\"chunk_type\":\"done\",\"session_id\":\"s-1\"}\n\n",
    );
    dispatcher.feed(stream.as_bytes(), &handler).await;

    assert_eq!(*handler.text.lock(), "Working on it. ");
    assert_eq!(handler.proposals.lock().len(), 1);
    assert_eq!(handler.questions.lock().len(), 1);
    assert_eq!(handler.done_sessions.lock().clone(), vec!["s-1".to_string()]);
    assert!(handler.errors.lock().is_empty());
}

#[tokio::test]
async fn test_malformed_frames_are_skipped_not_fatal() {
    let handler = CollectingHandler::default();
    let mut dispatcher = StreamDispatcher::new();

    let stream = concat!(
        "data: {\"chunk_type\":\"text\",\"content\":\"a\"}\n\n",
        "data: {{{{\n\n",
        "data: \n\n",
        "data: {\"missing_discriminator\":true}\n\n",
        "data: {\"chunk_type\":\"text\",\"content\":\"b\"}\n\n",
    );
    dispatcher.feed(stream.as_bytes(), &handler).await;
    assert_eq!(*handler.text.lock(), "ab");
}

#[tokio::test]
async fn test_stream_error_is_single_terminal_failure() {
    let handler = CollectingHandler::default();
    let mut dispatcher = StreamDispatcher::new();

    let items: Vec<Result<Vec<u8>, String>> = vec![
        Ok(b"data: {\"chunk_type\":\"text\",\"content\":\"partial \"}\n\n".to_vec()),
        Err("socket closed".to_string()),
    ];
    let result = dispatcher
        .dispatch(futures::stream::iter(items), &handler)
        .await;

    assert!(result.is_err());
    assert_eq!(*handler.text.lock(), "partial ");
    // The in-band error handler only fires for protocol-level error
    // chunks, not transport failures.
    assert!(handler.errors.lock().is_empty());
}

#[tokio::test]
async fn test_frames_split_at_every_byte_boundary() {
    // Chunk reassembly must not depend on where the network splits reads.
    let frame =
        b"data: {\"chunk_type\":\"text\",\"content\":\"abc\"}\n\ndata: {\"chunk_type\":\"done\",\"session_id\":\"s\"}\n\n";
    for split in 1..frame.len() - 1 {
        let handler = CollectingHandler::default();
        let mut dispatcher = StreamDispatcher::new();
        dispatcher.feed(&frame[..split], &handler).await;
        dispatcher.feed(&frame[split..], &handler).await;
        assert_eq!(*handler.text.lock(), "abc", "split at {}", split);
        assert_eq!(handler.done_sessions.lock().len(), 1, "split at {}", split);
    }
}
