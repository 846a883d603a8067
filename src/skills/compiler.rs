//! Skill document compilation.
//!
//! Turns a finished run (or a freshly recorded scenario) into a bounded,
//! human-readable skill document for the memory library. The document is
//! never allowed past `MAX_SKILL_CONTENT_LENGTH` once compiled; trimming
//! removes screenshots before steps, and steps before the scenario JSON.

use crate::browser::run::{BrowserRun, MessageKind, MessageRole};
use crate::skills::scenario::RpaScenario;
use std::collections::HashSet;

/// Hard character budget for a compiled skill document.
pub const MAX_SKILL_CONTENT_LENGTH: usize = 15_000;

/// At most this many step lines are extracted from a run log.
pub const MAX_STEP_LINES: usize = 12;

/// Trimming never drops below this many step lines.
pub const MIN_STEP_LINES: usize = 2;

/// At most this many screenshots are embedded.
pub const MAX_SCREENSHOTS: usize = 6;

/// Everything that goes into one skill document.
#[derive(Debug, Clone)]
pub struct SkillDraft {
    pub title: String,
    pub goal: String,
    pub steps: Vec<String>,
    pub screenshots: Vec<String>,
    pub scenario: Option<RpaScenario>,
}

impl SkillDraft {
    /// Build a draft from a finished run's log.
    pub fn from_run(run: &BrowserRun) -> Self {
        let screenshots = run
            .messages
            .iter()
            .filter(|m| m.kind == MessageKind::Screenshot)
            .filter_map(|m| m.image.clone())
            .take(MAX_SCREENSHOTS)
            .collect();

        Self {
            title: derive_title(&run.goal),
            goal: run.goal.clone(),
            steps: extract_step_lines(run),
            screenshots,
            scenario: run.scenario.clone(),
        }
    }

    /// Build a draft from a freshly recorded scenario.
    pub fn from_scenario(scenario: RpaScenario, goal: &str) -> Self {
        Self {
            title: derive_title(if goal.trim().is_empty() {
                &scenario.name
            } else {
                goal
            }),
            goal: goal.to_string(),
            steps: Vec::new(),
            screenshots: Vec::new(),
            scenario: Some(scenario),
        }
    }
}

/// Deterministic local title when no suggestion is available.
pub fn derive_title(goal: &str) -> String {
    let goal = goal.trim();
    if goal.is_empty() {
        "Recorded browser skill".to_string()
    } else {
        format!("Skill: {}", goal)
    }
}

/// Compile a draft into a document within the character budget.
pub fn compile(draft: &SkillDraft) -> String {
    let mut screenshots: Vec<&String> = draft.screenshots.iter().take(MAX_SCREENSHOTS).collect();
    let mut steps: Vec<&String> = draft.steps.iter().collect();
    let mut include_scenario = draft.scenario.is_some();

    loop {
        let doc = render(draft, &steps, &screenshots, include_scenario);
        if doc.chars().count() <= MAX_SKILL_CONTENT_LENGTH {
            return doc;
        }

        // Screenshots go first, one at a time from the tail.
        if screenshots.pop().is_some() {
            continue;
        }

        // Then trailing step lines, never below the minimum; once any
        // step is dropped no screenshot survives.
        if steps.len() > MIN_STEP_LINES {
            steps.pop();
            screenshots.clear();
            continue;
        }

        // Then the scenario block as a whole.
        if include_scenario {
            include_scenario = false;
            continue;
        }

        // Last resort: hard truncation.
        let mut truncated: String = doc.chars().take(MAX_SKILL_CONTENT_LENGTH - 1).collect();
        truncated.push('…');
        return truncated;
    }
}

fn render(
    draft: &SkillDraft,
    steps: &[&String],
    screenshots: &[&String],
    include_scenario: bool,
) -> String {
    let mut doc = format!("# {}\n", draft.title);
    if !draft.goal.trim().is_empty() {
        doc.push_str(&format!("\nGoal: {}\n", draft.goal.trim()));
    }

    if !steps.is_empty() {
        doc.push_str("\n## Steps\n");
        for (i, step) in steps.iter().enumerate() {
            doc.push_str(&format!("{}. {}\n", i + 1, step));
        }
    }

    if include_scenario {
        if let Some(scenario) = &draft.scenario {
            let json = serde_json::to_string_pretty(scenario)
                .unwrap_or_else(|_| "{}".to_string());
            doc.push_str("\n## RPA Scenario\n```json\n");
            doc.push_str(&json);
            doc.push_str("\n```\n");
        }
    }

    if !screenshots.is_empty() {
        doc.push_str("\n## Screenshots\n");
        for (i, shot) in screenshots.iter().enumerate() {
            doc.push_str(&format!(
                "\n![step {}](data:image/png;base64,{})\n",
                i + 1,
                shot
            ));
        }
    }

    doc
}

/// Extract up to [`MAX_STEP_LINES`] step summaries from a run's log.
///
/// Only assistant/system text messages qualify; known noise lines are
/// skipped, step-number and "Reason:" prefixes stripped, and duplicate
/// normalized lines suppressed. An empty result yields one synthetic
/// fallback line referencing the goal.
pub fn extract_step_lines(run: &BrowserRun) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut lines: Vec<String> = Vec::new();

    'outer: for message in &run.messages {
        if !matches!(message.role, MessageRole::Assistant | MessageRole::System) {
            continue;
        }
        if message.kind != MessageKind::Text {
            continue;
        }
        for raw in message.text.lines() {
            let line = raw.trim();
            if line.is_empty() || is_noise_line(line) {
                continue;
            }
            let line = strip_step_prefix(line);
            if line.is_empty() {
                continue;
            }
            if seen.insert(line.to_lowercase()) {
                lines.push(line.to_string());
                if lines.len() == MAX_STEP_LINES {
                    break 'outer;
                }
            }
        }
    }

    if lines.is_empty() {
        let goal = run.goal.trim();
        let fallback = if goal.is_empty() {
            "Completed a browser automation run".to_string()
        } else {
            format!("Completed the goal: {}", goal)
        };
        lines.push(fallback);
    }
    lines
}

fn is_noise_line(line: &str) -> bool {
    if line.starts_with("Session ") || line.starts_with("State change:") {
        return true;
    }
    line.to_lowercase().contains("progress too small")
}

/// Strip a leading step number ("3. ", "3) ", "Step 3:") or "Reason:".
fn strip_step_prefix(line: &str) -> &str {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("Reason:") {
        return rest.trim();
    }

    if let Some(rest) = strip_case_insensitive(line, "step ") {
        let after_digits = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        if after_digits.len() < rest.len() {
            if let Some(body) = after_digits.strip_prefix(':').or_else(|| after_digits.strip_prefix('.')) {
                return body.trim();
            }
        }
    }

    let digits_end = line
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit())
        .count();
    if digits_end > 0 {
        let rest = &line[digits_end..];
        if let Some(body) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return body.trim();
        }
    }

    line
}

fn strip_case_insensitive<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}
