//! Structured question flow.
//!
//! The AI can pause a turn to ask a batch of structured questions. One set
//! is active at a time; it is destroyed on submit or cancel. Answers are
//! collected per question and formatted back into free text for the reply.

use crate::error::{AgentdeckError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Synthetic option id the UI appends to choice questions. Selecting it
/// requires accompanying free text.
pub const OTHER_OPTION: &str = "__other__";

/// Marker rendered for a question that has no valid answer yet.
pub const NO_ANSWER_MARKER: &str = "(no answer)";

/// A single structured question. Empty `options` means free-text mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub placeholder: Option<String>,
}

/// Mutable answer state owned by the active set.
#[derive(Debug, Clone, Default)]
pub struct AnswerState {
    /// Set semantics, insertion order preserved for multi-select.
    pub selected: Vec<String>,
    pub other_text: String,
    pub free_text: String,
}

/// A batch of questions with collected answers.
#[derive(Debug, Clone)]
pub struct PendingQuestionSet {
    questions: Vec<Question>,
    context: Option<String>,
    answers: Vec<AnswerState>,
}

impl PendingQuestionSet {
    pub fn new(questions: Vec<Question>, context: Option<String>) -> Self {
        let answers = vec![AnswerState::default(); questions.len()];
        Self {
            questions,
            context,
            answers,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Select an option. Single-select replaces the selection; multi-select
    /// toggles membership, keeping insertion order.
    pub fn select(&mut self, index: usize, option: &str) {
        let Some(question) = self.questions.get(index) else {
            return;
        };
        let multiple = question.allow_multiple;
        let answer = &mut self.answers[index];
        if multiple {
            if let Some(pos) = answer.selected.iter().position(|s| s == option) {
                answer.selected.remove(pos);
            } else {
                answer.selected.push(option.to_string());
            }
        } else {
            answer.selected = vec![option.to_string()];
        }
    }

    pub fn set_other_text(&mut self, index: usize, text: &str) {
        if let Some(answer) = self.answers.get_mut(index) {
            answer.other_text = text.to_string();
        }
    }

    pub fn set_free_text(&mut self, index: usize, text: &str) {
        if let Some(answer) = self.answers.get_mut(index) {
            answer.free_text = text.to_string();
        }
    }

    pub fn answer(&self, index: usize) -> Option<&AnswerState> {
        self.answers.get(index)
    }

    /// A free-text question needs a non-empty trimmed answer; a choice
    /// question needs at least one selection, plus non-empty other text
    /// when the synthetic "other" option is selected.
    pub fn is_answer_valid(&self, index: usize) -> bool {
        let (Some(question), Some(answer)) = (self.questions.get(index), self.answers.get(index))
        else {
            return false;
        };

        if question.options.is_empty() {
            return !answer.free_text.trim().is_empty();
        }

        if answer.selected.is_empty() {
            return false;
        }
        if answer.selected.iter().any(|s| s == OTHER_OPTION) {
            return !answer.other_text.trim().is_empty();
        }
        true
    }

    /// True iff every question in the set satisfies its validity rule.
    pub fn is_complete(&self) -> bool {
        (0..self.questions.len()).all(|i| self.is_answer_valid(i))
    }

    /// Render one `"<question>: <answer>"` line per question. A slot that
    /// is not yet valid renders the explicit no-answer marker; this never
    /// happens once `is_complete()` holds.
    pub fn format(&self) -> String {
        self.questions
            .iter()
            .enumerate()
            .map(|(i, question)| format!("{}: {}", question.text, self.answer_text(i)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn answer_text(&self, index: usize) -> String {
        if !self.is_answer_valid(index) {
            return NO_ANSWER_MARKER.to_string();
        }
        let question = &self.questions[index];
        let answer = &self.answers[index];

        if question.options.is_empty() {
            return answer.free_text.trim().to_string();
        }

        let mut parts: Vec<String> = answer
            .selected
            .iter()
            .filter(|s| s.as_str() != OTHER_OPTION)
            .cloned()
            .collect();
        if answer.selected.iter().any(|s| s == OTHER_OPTION) {
            parts.push(answer.other_text.trim().to_string());
        }
        parts.join(", ")
    }
}

/// Owns the single active question set.
#[derive(Default)]
pub struct QuestionFlow {
    active: Mutex<Option<PendingQuestionSet>>,
}

impl QuestionFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a new set, replacing any previous one.
    pub fn begin(&self, questions: Vec<Question>, context: Option<String>) {
        let set = PendingQuestionSet::new(questions, context);
        *self.active.lock() = Some(set);
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Mutate the active set in place.
    pub fn with_active<R>(&self, f: impl FnOnce(&mut PendingQuestionSet) -> R) -> Option<R> {
        self.active.lock().as_mut().map(f)
    }

    /// Format and destroy the active set. Fails (keeping the set) when any
    /// answer is still invalid.
    pub fn submit(&self) -> Result<String> {
        let mut guard = self.active.lock();
        let Some(set) = guard.as_ref() else {
            return Err(AgentdeckError::Validation(
                "No question set is active".to_string(),
            ));
        };
        if !set.is_complete() {
            return Err(AgentdeckError::Validation(
                "Question set has unanswered questions".to_string(),
            ));
        }
        let formatted = set.format();
        *guard = None;
        Ok(formatted)
    }

    /// Discard the active set without emitting a message.
    pub fn cancel(&self) {
        *self.active.lock() = None;
    }
}
