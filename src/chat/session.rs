//! Chat session glue.
//!
//! Implements [`ChunkHandler`] over the shared state: proposal chunks feed
//! the approval queue, question chunks activate the question flow, and
//! delegation tool results hand goals to the browser orchestrator. Handlers
//! re-read the latest shared state on entry; long side effects run on
//! spawned tasks so the next chunk is never blocked behind them.

use crate::api::BackendClient;
use crate::approval::{Decision, DecideTarget, Proposal, ProposalConfirmer, ProposalQueue};
use crate::browser::run::RunSource;
use crate::browser::BrowserOrchestrator;
use crate::config::{AppConfig, ApprovalMode};
use crate::error::Result;
use crate::questions::{Question, QuestionFlow};
use crate::stream::ChunkHandler;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Tool whose result payload carries a browser-delegation goal.
pub const DELEGATE_TOOL: &str = "delegate_browser_task";

/// Outbound surface the session needs from the backend.
#[async_trait]
pub trait ChatBackend: ProposalConfirmer {
    async fn send_message(&self, text: &str) -> Result<()>;
    async fn pending_proposals(&self) -> Result<Vec<Proposal>>;
    fn set_session(&self, session_id: Option<String>);
}

#[async_trait]
impl ChatBackend for BackendClient {
    async fn send_message(&self, text: &str) -> Result<()> {
        self.send_chat_message(text).await
    }

    async fn pending_proposals(&self) -> Result<Vec<Proposal>> {
        BackendClient::pending_proposals(self).await
    }

    fn set_session(&self, session_id: Option<String>) {
        self.set_session_id(session_id);
    }
}

#[derive(Default)]
struct SessionState {
    session_id: Option<String>,
    /// Assistant text accumulated for the open turn; `None` until the
    /// first text/tool_start chunk opens one.
    turn: Option<String>,
    offline: bool,
    last_error: Option<String>,
}

pub struct ChatSession<B: ChatBackend> {
    proposals: Arc<ProposalQueue>,
    questions: Arc<QuestionFlow>,
    orchestrator: Arc<BrowserOrchestrator>,
    backend: Arc<B>,
    config: Arc<RwLock<AppConfig>>,
    state: Mutex<SessionState>,
}

impl<B: ChatBackend + 'static> ChatSession<B> {
    pub fn new(
        proposals: Arc<ProposalQueue>,
        questions: Arc<QuestionFlow>,
        orchestrator: Arc<BrowserOrchestrator>,
        backend: Arc<B>,
        config: Arc<RwLock<AppConfig>>,
    ) -> Self {
        Self {
            proposals,
            questions,
            orchestrator,
            backend,
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    /// Switch to another conversation: queued proposals and any active
    /// question set belong to the old session and are dropped.
    pub fn switch_session(&self, session_id: Option<String>) {
        self.proposals.clear();
        self.questions.cancel();
        self.backend.set_session(session_id.clone());
        self.state.lock().session_id = session_id;
    }

    /// Change the approval mode. Switching to automatic clears the queue;
    /// nothing is awaiting a human anymore.
    pub fn set_approval_mode(&self, mode: ApprovalMode) {
        self.config.write().approval_mode = mode;
        if mode == ApprovalMode::Automatic {
            self.proposals.clear();
        }
    }

    /// Apply a human decision to queued proposals.
    pub async fn decide(&self, target: DecideTarget, decision: Decision) -> Result<()> {
        self.proposals
            .decide(target, decision, self.backend.as_ref())
            .await
    }

    /// Pull the backend's pending list into the queue (idempotent).
    pub async fn refresh_pending(&self) -> Result<usize> {
        let pending = self.backend.pending_proposals().await?;
        let mut added = 0;
        for proposal in pending {
            if self.proposals.enqueue(proposal) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Format the completed answers and send them as the reply.
    pub async fn submit_answers(&self) -> Result<()> {
        let formatted = self.questions.submit()?;
        self.backend.send_message(&formatted).await
    }

    pub fn cancel_questions(&self) {
        self.questions.cancel();
    }

    /// Take the accumulated assistant text for the finished turn.
    pub fn take_turn_text(&self) -> Option<String> {
        self.state.lock().turn.take()
    }

    pub fn take_last_error(&self) -> Option<String> {
        self.state.lock().last_error.take()
    }

    /// Definite offline status, set by the driver when a stream read
    /// fails. Never set for partial truncation.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.state.lock().offline
    }
}

#[async_trait]
impl<B: ChatBackend + 'static> ChunkHandler for ChatSession<B> {
    async fn open_turn(&self) {
        let mut state = self.state.lock();
        if state.turn.is_none() {
            state.turn = Some(String::new());
        }
    }

    async fn on_text(&self, content: &str) {
        if let Some(turn) = self.state.lock().turn.as_mut() {
            turn.push_str(content);
        }
    }

    async fn on_tool_start(&self, tool_name: &str, _args: &serde_json::Value) {
        tracing::debug!("Tool started: {}", tool_name);
    }

    async fn on_tool_end(&self, tool_name: &str, result: &serde_json::Value) {
        tracing::debug!("Tool finished: {}", tool_name);
        if tool_name != DELEGATE_TOOL {
            return;
        }
        let Some(goal) = result.get("goal").and_then(|v| v.as_str()) else {
            tracing::warn!("Delegation result carries no goal");
            return;
        };

        // Delegation may suspend for a while; the next chunk must not
        // queue behind it.
        let orchestrator = self.orchestrator.clone();
        let goal = goal.to_string();
        tokio::spawn(async move {
            match orchestrator.delegate(&goal, RunSource::External).await {
                Ok(outcome) => tracing::info!("Delegated browser goal: {:?}", outcome),
                Err(e) => tracing::error!("Browser delegation failed: {}", e),
            }
        });
    }

    async fn on_tool_error(&self, tool_name: &str, error: &str) {
        tracing::warn!("Tool {} failed: {}", tool_name, error);
    }

    async fn on_proposal(&self, proposal: Proposal) {
        if self.config.read().approval_mode == ApprovalMode::Automatic {
            tracing::debug!("Automatic mode, proposal {} not queued", proposal.id);
            return;
        }
        // Proposals take priority as the blocking interaction; an active
        // question set yields.
        if self.questions.is_active() {
            tracing::info!("Cancelling active question set, proposal arrived");
            self.questions.cancel();
        }
        self.proposals.enqueue(proposal);
    }

    async fn on_questions(&self, questions: Vec<Question>, context: Option<String>) {
        if !self.proposals.is_empty() {
            tracing::warn!(
                "Ignoring question set while {} proposals await decisions",
                self.proposals.len()
            );
            return;
        }
        self.questions.begin(questions, context);
    }

    async fn on_done(&self, session_id: &str) {
        let mut state = self.state.lock();
        state.session_id = Some(session_id.to_string());
        drop(state);
        self.backend.set_session(Some(session_id.to_string()));
    }

    async fn on_error(&self, message: &str) {
        tracing::warn!("Backend reported turn error: {}", message);
        self.state.lock().last_error = Some(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::commands::{AgentCommand, AgentEvent, CommandAck};
    use crate::browser::port::AgentPort;
    use crate::skills::matcher::{MemoryEntry, SkillMatcher, SkillStore};
    use crate::stream::StreamDispatcher;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct MockBackend {
        messages: Mutex<Vec<String>>,
        pending: Mutex<Vec<Proposal>>,
        session: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ProposalConfirmer for MockBackend {
        async fn confirm(&self, _proposal: &Proposal, _decision: Decision) -> Result<()> {
            Ok(())
        }

        async fn send_confirmation(&self, message: &str) -> Result<()> {
            self.messages.lock().push(message.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        async fn send_message(&self, text: &str) -> Result<()> {
            self.messages.lock().push(text.to_string());
            Ok(())
        }

        async fn pending_proposals(&self) -> Result<Vec<Proposal>> {
            Ok(self.pending.lock().clone())
        }

        fn set_session(&self, session_id: Option<String>) {
            *self.session.lock() = session_id;
        }
    }

    struct MockPort {
        sent: Mutex<Vec<AgentCommand>>,
        events_tx: broadcast::Sender<AgentEvent>,
    }

    impl MockPort {
        fn new() -> Self {
            let (events_tx, _) = broadcast::channel(16);
            Self {
                sent: Mutex::new(Vec::new()),
                events_tx,
            }
        }
    }

    #[async_trait]
    impl AgentPort for MockPort {
        async fn send(&self, command: AgentCommand) -> Result<CommandAck> {
            self.sent.lock().push(command);
            Ok(CommandAck {
                ok: true,
                error: None,
            })
        }

        fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
            self.events_tx.subscribe()
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl SkillStore for EmptyStore {
        async fn search_skills(
            &self,
            _query: &str,
            _workspace_id: &str,
            _limit: usize,
        ) -> Result<Vec<MemoryEntry>> {
            Ok(Vec::new())
        }

        async fn list_skills(&self, _workspace_id: &str, _limit: usize) -> Result<Vec<MemoryEntry>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        session: Arc<ChatSession<MockBackend>>,
        backend: Arc<MockBackend>,
        port: Arc<MockPort>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(RwLock::new(AppConfig::default()));
        let port = Arc::new(MockPort::new());
        let matcher = SkillMatcher::new(Arc::new(EmptyStore), "ws".to_string());
        let orchestrator = Arc::new(BrowserOrchestrator::new(
            port.clone(),
            matcher,
            config.clone(),
        ));
        let backend = Arc::new(MockBackend::default());
        let session = Arc::new(ChatSession::new(
            Arc::new(ProposalQueue::new()),
            Arc::new(QuestionFlow::new()),
            orchestrator,
            backend.clone(),
            config,
        ));
        Fixture {
            session,
            backend,
            port,
        }
    }

    fn proposal_frame(id: &str) -> String {
        format!(
            "data: {{\"chunk_type\":\"proposal\",\"proposal\":{{\"id\":\"{}\",\"type\":\"create_task\",\"description\":\"task\"}}}}\n\n",
            id
        )
    }

    #[tokio::test]
    async fn test_repeated_proposal_ids_enqueue_once() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        let bytes = format!(
            "{}{}{}",
            proposal_frame("p1"),
            proposal_frame("p1"),
            proposal_frame("p2")
        );
        dispatcher.feed(bytes.as_bytes(), f.session.as_ref()).await;
        assert_eq!(f.session.proposals.len(), 2);
    }

    #[tokio::test]
    async fn test_questions_refused_while_proposals_pending() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        let bytes = format!(
            "{}data: {{\"chunk_type\":\"questions\",\"questions\":[{{\"id\":\"q1\",\"text\":\"Color?\"}}]}}\n\n",
            proposal_frame("p1")
        );
        dispatcher.feed(bytes.as_bytes(), f.session.as_ref()).await;
        assert!(!f.session.questions.is_active());
    }

    #[tokio::test]
    async fn test_proposal_cancels_active_question_set() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        dispatcher
            .feed(
                b"data: {\"chunk_type\":\"questions\",\"questions\":[{\"id\":\"q1\",\"text\":\"Color?\"}]}\n\n",
                f.session.as_ref(),
            )
            .await;
        assert!(f.session.questions.is_active());

        dispatcher
            .feed(proposal_frame("p1").as_bytes(), f.session.as_ref())
            .await;
        assert!(!f.session.questions.is_active());
        assert_eq!(f.session.proposals.len(), 1);
    }

    #[tokio::test]
    async fn test_automatic_mode_skips_queue() {
        let f = fixture();
        f.session.set_approval_mode(ApprovalMode::Automatic);
        let mut dispatcher = StreamDispatcher::new();
        dispatcher
            .feed(proposal_frame("p1").as_bytes(), f.session.as_ref())
            .await;
        assert!(f.session.proposals.is_empty());
    }

    #[tokio::test]
    async fn test_switching_to_automatic_clears_queue() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        dispatcher
            .feed(proposal_frame("p1").as_bytes(), f.session.as_ref())
            .await;
        assert_eq!(f.session.proposals.len(), 1);

        f.session.set_approval_mode(ApprovalMode::Automatic);
        assert!(f.session.proposals.is_empty());
    }

    #[tokio::test]
    async fn test_done_records_session_id() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        dispatcher
            .feed(
                b"data: {\"chunk_type\":\"done\",\"session_id\":\"s-9\"}\n\n",
                f.session.as_ref(),
            )
            .await;
        assert_eq!(f.session.session_id().as_deref(), Some("s-9"));
        assert_eq!(f.backend.session.lock().as_deref(), Some("s-9"));
    }

    #[tokio::test]
    async fn test_switch_session_clears_blocking_state() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        dispatcher
            .feed(proposal_frame("p1").as_bytes(), f.session.as_ref())
            .await;

        f.session.switch_session(Some("s-new".to_string()));
        assert!(f.session.proposals.is_empty());
        assert_eq!(f.session.session_id().as_deref(), Some("s-new"));
    }

    #[tokio::test]
    async fn test_delegation_tool_end_starts_run() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        dispatcher
            .feed(
                b"data: {\"chunk_type\":\"tool_end\",\"tool_name\":\"delegate_browser_task\",\"result\":{\"goal\":\"book a meeting room\"}}\n\n",
                f.session.as_ref(),
            )
            .await;

        // Delegation runs on a spawned task.
        for _ in 0..20 {
            if !f.port.sent.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let sent = f.port.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            AgentCommand::AgentStart { goal, .. } => assert_eq!(goal, "book a meeting room"),
            other => panic!("expected agent.start, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_answers_sends_formatted_reply() {
        let f = fixture();
        f.session.questions.begin(
            vec![Question {
                id: "q1".to_string(),
                text: "Budget?".to_string(),
                options: Vec::new(),
                allow_multiple: false,
                placeholder: None,
            }],
            None,
        );
        f.session
            .questions
            .with_active(|set| set.set_free_text(0, "500 EUR"));
        f.session.submit_answers().await.unwrap();

        assert_eq!(
            f.backend.messages.lock().clone(),
            vec!["Budget?: 500 EUR".to_string()]
        );
        assert!(!f.session.questions.is_active());
    }

    #[tokio::test]
    async fn test_turn_text_accumulates_lazily() {
        let f = fixture();
        let mut dispatcher = StreamDispatcher::new();
        dispatcher
            .feed(
                b"data: {\"chunk_type\":\"tool_end\",\"tool_name\":\"t\"}\n\n",
                f.session.as_ref(),
            )
            .await;
        // Side-effect-only stream: no turn opened.
        assert!(f.session.take_turn_text().is_none());

        dispatcher
            .feed(
                b"data: {\"chunk_type\":\"text\",\"content\":\"Hel\"}\n\ndata: {\"chunk_type\":\"text\",\"content\":\"lo\"}\n\n",
                f.session.as_ref(),
            )
            .await;
        assert_eq!(f.session.take_turn_text().as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_refresh_pending_is_idempotent() {
        let f = fixture();
        f.backend.pending.lock().push(Proposal {
            id: "p1".to_string(),
            kind: crate::approval::ProposalKind::CreateTask,
            payload: serde_json::Value::Null,
            description: "task".to_string(),
            created_at: 0,
        });

        assert_eq!(f.session.refresh_pending().await.unwrap(), 1);
        assert_eq!(f.session.refresh_pending().await.unwrap(), 0);
        assert_eq!(f.session.proposals.len(), 1);
    }
}
