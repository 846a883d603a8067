// Integration tests for the proposal approval flow

use agentdeck_lib::approval::{
    DecideTarget, Decision, Proposal, ProposalConfirmer, ProposalKind, ProposalQueue,
};
use agentdeck_lib::error::{AgentdeckError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

fn proposal(id: &str, description: &str) -> Proposal {
    Proposal {
        id: id.to_string(),
        kind: ProposalKind::CreateTask,
        payload: serde_json::json!({ "title": description }),
        description: description.to_string(),
        created_at: 0,
    }
}

#[derive(Default)]
struct Backend {
    fail_ids: Vec<String>,
    confirmations: Mutex<Vec<String>>,
    chat_messages: Mutex<Vec<String>>,
}

#[async_trait]
impl ProposalConfirmer for Backend {
    async fn confirm(&self, proposal: &Proposal, decision: Decision) -> Result<()> {
        if self.fail_ids.contains(&proposal.id) {
            return Err(AgentdeckError::Backend("500 internal".to_string()));
        }
        self.confirmations
            .lock()
            .push(format!("{}:{}", proposal.id, decision.as_str()));
        Ok(())
    }

    async fn send_confirmation(&self, message: &str) -> Result<()> {
        self.chat_messages.lock().push(message.to_string());
        Ok(())
    }
}

/// Approve-all over P1, P2 where P2's remote confirmation fails: the
/// queue ends containing only P2 and the confirmation covers only P1.
#[tokio::test]
async fn test_approve_all_with_midbatch_failure() {
    let queue = ProposalQueue::new();
    queue.enqueue(proposal("P1", "Create task: weekly report"));
    queue.enqueue(proposal("P2", "Assign task to Kim"));

    let backend = Backend {
        fail_ids: vec!["P2".to_string()],
        ..Default::default()
    };

    let result = queue
        .decide(DecideTarget::All, Decision::Approve, &backend)
        .await;
    assert!(result.is_err());

    let remaining: Vec<String> = queue.snapshot().iter().map(|p| p.id.clone()).collect();
    assert_eq!(remaining, vec!["P2".to_string()]);

    let messages = backend.chat_messages.lock().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("weekly report"));
    assert!(!messages[0].contains("Kim"));
}

#[tokio::test]
async fn test_full_drain_replays_single_confirmation_message() {
    let queue = ProposalQueue::new();
    queue.enqueue(proposal("P1", "Create project Alpha"));
    queue.enqueue(proposal("P2", "Break down phase 1"));
    queue.enqueue(proposal("P3", "Store meeting notes"));

    let backend = Backend::default();
    queue
        .decide(DecideTarget::All, Decision::Approve, &backend)
        .await
        .unwrap();

    assert!(queue.is_empty());
    let messages = backend.chat_messages.lock().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Approved 3 proposals:"));
    assert_eq!(messages[0].matches("\n- ").count(), 3);

    // Every unit got its own remote confirmation, in arrival order.
    assert_eq!(
        backend.confirmations.lock().clone(),
        vec![
            "P1:approve".to_string(),
            "P2:approve".to_string(),
            "P3:approve".to_string()
        ]
    );
}

#[tokio::test]
async fn test_mixed_decide_then_drain() {
    let queue = ProposalQueue::new();
    queue.enqueue(proposal("P1", "first"));
    queue.enqueue(proposal("P2", "second"));

    let backend = Backend::default();
    queue
        .decide(
            DecideTarget::One("P2".to_string()),
            Decision::Reject,
            &backend,
        )
        .await
        .unwrap();
    // Rejection drained nothing approvable; no message yet.
    assert!(backend.chat_messages.lock().is_empty());
    assert_eq!(queue.len(), 1);

    queue
        .decide(
            DecideTarget::One("P1".to_string()),
            Decision::Approve,
            &backend,
        )
        .await
        .unwrap();
    let messages = backend.chat_messages.lock().clone();
    assert_eq!(messages, vec!["Approved: first".to_string()]);
}

#[tokio::test]
async fn test_enqueue_during_decision_survives() {
    // The queue is shared; a proposal arriving between units must not be
    // lost and must not be decided by the running batch.
    let queue = std::sync::Arc::new(ProposalQueue::new());
    queue.enqueue(proposal("P1", "first"));

    let backend = Backend::default();
    queue
        .decide(DecideTarget::All, Decision::Approve, &backend)
        .await
        .unwrap();

    queue.enqueue(proposal("P9", "late arrival"));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.current().unwrap().id, "P9");
}
