//! Proposal approval queue.
//!
//! Holds AI-proposed actions until a human approves or rejects them. Each
//! decision unit issues its own remote confirmation; a unit failure halts
//! the rest of the batch but already-applied removals stand.

use crate::approval::proposal::{Decision, Proposal};
use crate::error::{AgentdeckError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Remote side of a decision: confirm one unit, replay the flattened
/// confirmation as an outbound chat message.
#[async_trait]
pub trait ProposalConfirmer: Send + Sync {
    async fn confirm(&self, proposal: &Proposal, decision: Decision) -> Result<()>;
    async fn send_confirmation(&self, message: &str) -> Result<()>;
}

/// Which proposals a decision applies to.
#[derive(Debug, Clone)]
pub enum DecideTarget {
    One(String),
    All,
}

#[derive(Default)]
struct QueueState {
    items: Vec<Proposal>,
    active_index: usize,
    in_flight: bool,
    /// Approved items buffered until the queue drains (or a batch aborts).
    approved: Vec<Proposal>,
}

impl QueueState {
    fn clamp_index(&mut self) {
        if self.items.is_empty() {
            self.active_index = 0;
        } else if self.active_index >= self.items.len() {
            self.active_index = self.items.len() - 1;
        }
    }
}

/// FIFO queue of pending proposals with clamped pagination and a
/// queue-level single-flight guard for decisions.
#[derive(Default)]
pub struct ProposalQueue {
    inner: Mutex<QueueState>,
}

impl ProposalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by id: an already-queued id is ignored. Arrival order is
    /// preserved and the active index re-clamped.
    pub fn enqueue(&self, proposal: Proposal) -> bool {
        let mut state = self.inner.lock();
        if state.items.iter().any(|p| p.id == proposal.id) {
            tracing::debug!("Ignoring duplicate proposal {}", proposal.id);
            return false;
        }
        state.items.push(proposal);
        state.clamp_index();
        true
    }

    /// Drop everything: queued items, buffered approvals, pagination.
    /// Used on session change and when approval switches to automatic.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.items.clear();
        state.approved.clear();
        state.active_index = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Proposal> {
        self.inner.lock().items.clone()
    }

    pub fn active_index(&self) -> usize {
        self.inner.lock().active_index
    }

    pub fn current(&self) -> Option<Proposal> {
        let state = self.inner.lock();
        state.items.get(state.active_index).cloned()
    }

    /// Move to the next proposal. Rejected while a decision is in flight.
    pub fn select_next(&self) -> bool {
        let mut state = self.inner.lock();
        if state.in_flight || state.active_index + 1 >= state.items.len() {
            return false;
        }
        state.active_index += 1;
        true
    }

    /// Move to the previous proposal. Rejected while a decision is in flight.
    pub fn select_prev(&self) -> bool {
        let mut state = self.inner.lock();
        if state.in_flight || state.active_index == 0 || state.items.is_empty() {
            return false;
        }
        state.active_index -= 1;
        true
    }

    pub fn decision_in_flight(&self) -> bool {
        self.inner.lock().in_flight
    }

    /// Apply a decision to one proposal or the whole queue.
    ///
    /// Each unit confirms remotely before its local removal; a failed unit
    /// raises immediately, halting the remaining batch without rolling
    /// back removals already applied. Buffered approvals are flattened
    /// into a confirmation message and replayed once the queue drains, or
    /// when a batch aborts (covering only the units that succeeded).
    pub async fn decide(
        &self,
        target: DecideTarget,
        decision: Decision,
        confirmer: &dyn ProposalConfirmer,
    ) -> Result<()> {
        let unit_ids: Vec<String> = {
            let mut state = self.inner.lock();
            if state.in_flight {
                return Err(AgentdeckError::Validation(
                    "A proposal decision is already in flight".to_string(),
                ));
            }
            state.in_flight = true;
            match &target {
                DecideTarget::All => state.items.iter().map(|p| p.id.clone()).collect(),
                DecideTarget::One(id) => vec![id.clone()],
            }
        };
        let _guard = FlightGuard { queue: self };

        for id in unit_ids {
            // Re-read the latest state: the item may have been cleared by a
            // session change while a previous unit's confirmation ran.
            let proposal = {
                let state = self.inner.lock();
                state.items.iter().find(|p| p.id == id).cloned()
            };
            let Some(proposal) = proposal else {
                tracing::debug!("Proposal {} vanished before confirmation, skipping", id);
                continue;
            };

            if let Err(e) = confirmer.confirm(&proposal, decision).await {
                tracing::warn!("Proposal {} confirmation failed: {}", proposal.id, e);
                self.flush_confirmation(confirmer).await;
                return Err(e);
            }

            let mut state = self.inner.lock();
            if let Some(pos) = state.items.iter().position(|p| p.id == id) {
                let removed = state.items.remove(pos);
                state.clamp_index();
                if decision == Decision::Approve {
                    state.approved.push(removed);
                }
            }
        }

        let drained = self.inner.lock().items.is_empty();
        if drained {
            self.flush_confirmation(confirmer).await;
        }
        Ok(())
    }

    /// Send the flattened confirmation for buffered approvals, if any.
    async fn flush_confirmation(&self, confirmer: &dyn ProposalConfirmer) {
        let approved = {
            let mut state = self.inner.lock();
            std::mem::take(&mut state.approved)
        };
        if approved.is_empty() {
            return;
        }
        let message = format_confirmation(&approved);
        if let Err(e) = confirmer.send_confirmation(&message).await {
            tracing::warn!("Failed to replay approval confirmation: {}", e);
        }
    }
}

struct FlightGuard<'a> {
    queue: &'a ProposalQueue,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.queue.inner.lock().in_flight = false;
    }
}

/// One confirmation line: singular for exactly one item, bulleted list
/// otherwise.
fn format_confirmation(approved: &[Proposal]) -> String {
    if approved.len() == 1 {
        format!("Approved: {}", describe(&approved[0]))
    } else {
        let mut message = format!("Approved {} proposals:", approved.len());
        for proposal in approved {
            message.push_str("\n- ");
            message.push_str(&describe(proposal));
        }
        message
    }
}

fn describe(proposal: &Proposal) -> String {
    if proposal.description.trim().is_empty() {
        proposal.id.clone()
    } else {
        proposal.description.clone()
    }
}
