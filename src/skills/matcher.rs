//! Skill matching against the shared memory library.
//!
//! Given a free-text goal, searches skill-typed memory entries for one that
//! embeds a runnable scenario, scoring candidates by lexical overlap and
//! backend relevance. The overlap thresholds below are load-bearing for
//! scenario selection; do not tune them casually.

use crate::error::Result;
use crate::skills::scenario::RpaScenario;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Minimum backend relevance for a candidate without lexical overlap.
pub const RELEVANCE_THRESHOLD: f64 = 0.55;

/// How much of the entry body the verbatim-goal check scans.
const BODY_PREFIX_LEN: usize = 2200;

/// Goal tokens shorter than this are ignored.
const MIN_TOKEN_LEN: usize = 3;

/// At most this many goal tokens participate in the hit count.
const MAX_GOAL_TOKENS: usize = 8;

/// Page size for the relevance search.
const SEARCH_LIMIT: usize = 20;

/// Page size for the unfiltered-list fallback.
const LIST_FALLBACK_LIMIT: usize = 50;

/// A skill-typed memory entry as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Backend relevance score; zero for entries from the list fallback.
    #[serde(default)]
    pub score: f64,
}

/// Read side of the skill library.
#[async_trait]
pub trait SkillStore: Send + Sync {
    /// Relevance search over skill-typed entries. May fail with an
    /// unprocessable-request error, in which case callers fall back to
    /// `list_skills`.
    async fn search_skills(
        &self,
        query: &str,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;

    /// Unfiltered listing of the same scope.
    async fn list_skills(&self, workspace_id: &str, limit: usize) -> Result<Vec<MemoryEntry>>;
}

/// The selected skill for a goal.
#[derive(Debug, Clone)]
pub struct SkillMatch {
    pub entry_id: String,
    pub title: String,
    pub scenario: RpaScenario,
    pub relevance: f64,
    pub overlap: bool,
}

pub struct SkillMatcher {
    store: std::sync::Arc<dyn SkillStore>,
    workspace_id: String,
}

impl SkillMatcher {
    pub fn new(store: std::sync::Arc<dyn SkillStore>, workspace_id: String) -> Self {
        Self {
            store,
            workspace_id,
        }
    }

    /// Find the best matching skill for a goal, or none.
    pub async fn find_best(&self, goal: &str) -> Result<Option<SkillMatch>> {
        let entries = match self
            .store
            .search_skills(goal, &self.workspace_id, SEARCH_LIMIT)
            .await
        {
            Ok(entries) => entries,
            Err(e) if e.is_unprocessable() => {
                tracing::warn!("Skill search unprocessable, listing scope unfiltered");
                self.store
                    .list_skills(&self.workspace_id, LIST_FALLBACK_LIMIT)
                    .await?
                    .into_iter()
                    .map(|mut entry| {
                        entry.score = 0.0;
                        entry
                    })
                    .collect()
            }
            Err(e) => return Err(e),
        };

        let mut candidates: Vec<SkillMatch> = Vec::new();
        for entry in entries {
            let Some(scenario) = extract_scenario(&entry.content) else {
                continue;
            };
            let overlap = has_lexical_overlap(goal, &entry.title, &entry.content);
            if !overlap && entry.score < RELEVANCE_THRESHOLD {
                continue;
            }
            candidates.push(SkillMatch {
                entry_id: entry.id,
                title: entry.title,
                scenario,
                relevance: entry.score,
                overlap,
            });
        }

        // Overlap first, then relevance, then richer scenarios.
        candidates.sort_by(|a, b| {
            b.overlap
                .cmp(&a.overlap)
                .then(
                    b.relevance
                        .partial_cmp(&a.relevance)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.scenario.steps.len().cmp(&a.scenario.steps.len()))
        });

        Ok(candidates.into_iter().next())
    }
}

/// Lexical overlap between a goal and a candidate's title/body.
///
/// Declared when title and goal are substrings of each other (title ≥4
/// chars), when the goal (≥4 chars) appears verbatim in the body prefix,
/// or when at least `min(2, token_count)` goal tokens hit title or body.
pub fn has_lexical_overlap(goal: &str, title: &str, body: &str) -> bool {
    let goal = goal.trim().to_lowercase();
    if goal.is_empty() {
        return false;
    }
    let title = title.trim().to_lowercase();
    let body = body.to_lowercase();

    if title.len() >= 4 && (title.contains(&goal) || goal.contains(&title)) {
        return true;
    }

    if goal.len() >= 4 {
        let prefix: String = body.chars().take(BODY_PREFIX_LEN).collect();
        if prefix.contains(&goal) {
            return true;
        }
    }

    let tokens: Vec<&str> = goal
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .take(MAX_GOAL_TOKENS)
        .collect();
    if tokens.is_empty() {
        return false;
    }
    let needed = tokens.len().min(2);
    let hits = tokens
        .iter()
        .filter(|t| title.contains(**t) || body.contains(**t))
        .count();
    hits >= needed
}

/// Extract an embedded scenario from a skill body.
///
/// Scans fenced JSON blocks, preferring one under an explicit RPA-scenario
/// label, otherwise taking the first block that parses into a scenario
/// with at least one step. Truncated JSON is recovered by balanced-brace
/// extraction before the block is given up on.
pub fn extract_scenario(content: &str) -> Option<RpaScenario> {
    let blocks = fenced_blocks(content);

    let labeled = blocks
        .iter()
        .filter(|b| b.rpa_labeled)
        .find_map(|b| parse_scenario_block(&b.body));
    if labeled.is_some() {
        return labeled;
    }

    blocks.iter().find_map(|b| parse_scenario_block(&b.body))
}

struct FencedBlock {
    body: String,
    /// Fence info string or preceding heading names an RPA scenario.
    rpa_labeled: bool,
}

fn fenced_blocks(content: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut in_block = false;
    let mut body = String::new();
    let mut labeled = false;
    let mut last_heading = String::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            if in_block {
                blocks.push(FencedBlock {
                    body: std::mem::take(&mut body),
                    rpa_labeled: labeled,
                });
                in_block = false;
            } else {
                let info = trimmed.trim_start_matches('`').trim().to_lowercase();
                labeled = info.contains("rpa") || last_heading.contains("rpa scenario");
                in_block = true;
            }
            continue;
        }
        if in_block {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        } else if trimmed.starts_with('#') {
            last_heading = trimmed.trim_start_matches('#').trim().to_lowercase();
        }
    }

    // An unterminated fence still yields its partial body; balanced-brace
    // recovery handles the truncation.
    if in_block && !body.is_empty() {
        blocks.push(FencedBlock {
            body,
            rpa_labeled: labeled,
        });
    }

    blocks
}

fn parse_scenario_block(body: &str) -> Option<RpaScenario> {
    if let Ok(scenario) = serde_json::from_str::<RpaScenario>(body) {
        if !scenario.steps.is_empty() {
            return Some(scenario);
        }
        return None;
    }

    let balanced = extract_balanced_json(body)?;
    let scenario = serde_json::from_str::<RpaScenario>(&balanced).ok()?;
    if scenario.steps.is_empty() {
        return None;
    }
    Some(scenario)
}

/// Take the longest balanced `{...}` object starting at the first brace,
/// honoring strings and escapes. Returns the balanced slice, or the whole
/// tail if the object never closes.
fn extract_balanced_json(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentdeckError;
    use parking_lot::Mutex;

    fn skill_body(steps: usize) -> String {
        let steps_json: Vec<String> = (0..steps)
            .map(|i| format!(r##"{{"type":"click","selector":"#b{}"}}"##, i))
            .collect();
        format!(
            "Some notes about the procedure.\n\n## RPA Scenario\n```json\n{{\"name\":\"expense\",\"start_url\":\"https://erp.example.com\",\"steps\":[{}]}}\n```\n",
            steps_json.join(",")
        )
    }

    struct MockStore {
        search_result: Mutex<Option<Result<Vec<MemoryEntry>>>>,
        list_result: Mutex<Option<Vec<MemoryEntry>>>,
        list_called: Mutex<bool>,
    }

    impl MockStore {
        fn searching(entries: Vec<MemoryEntry>) -> Self {
            Self {
                search_result: Mutex::new(Some(Ok(entries))),
                list_result: Mutex::new(None),
                list_called: Mutex::new(false),
            }
        }

        fn unprocessable_with_list(entries: Vec<MemoryEntry>) -> Self {
            Self {
                search_result: Mutex::new(Some(Err(AgentdeckError::Backend(
                    "422 Unprocessable Entity".to_string(),
                )))),
                list_result: Mutex::new(Some(entries)),
                list_called: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl SkillStore for MockStore {
        async fn search_skills(
            &self,
            _query: &str,
            _workspace_id: &str,
            _limit: usize,
        ) -> Result<Vec<MemoryEntry>> {
            self.search_result.lock().take().unwrap()
        }

        async fn list_skills(&self, _workspace_id: &str, _limit: usize) -> Result<Vec<MemoryEntry>> {
            *self.list_called.lock() = true;
            Ok(self.list_result.lock().clone().unwrap_or_default())
        }
    }

    fn entry(id: &str, title: &str, content: String, score: f64) -> MemoryEntry {
        MemoryEntry {
            id: id.to_string(),
            title: title.to_string(),
            content,
            score,
        }
    }

    #[test]
    fn test_overlap_title_substring() {
        assert!(has_lexical_overlap(
            "submit expense report",
            "Expense report",
            ""
        ));
        assert!(has_lexical_overlap("pay", "Submit and pay invoices", ""));
        // Short titles never match via the substring rule.
        assert!(!has_lexical_overlap("xyzzy", "pay", ""));
    }

    #[test]
    fn test_overlap_goal_in_body_prefix() {
        let body = format!("{}submit expense report{}", "x".repeat(100), "y".repeat(100));
        assert!(has_lexical_overlap("submit expense report", "untitled", &body));

        // Beyond the scanned prefix the verbatim rule no longer applies,
        // but token hits still can; use unrelated tokens to isolate it.
        let far_body = format!("{}qqfoo qqbar", "z ".repeat(2000));
        assert!(!has_lexical_overlap("qqfoo qqbar", "nothing", &far_body[..4000]));
    }

    #[test]
    fn test_overlap_token_hits() {
        // 3 tokens, needs min(2, 3) = 2 hits.
        assert!(has_lexical_overlap(
            "submit expense report",
            "How to file an expense",
            "then press report"
        ));
        assert!(!has_lexical_overlap(
            "submit expense report",
            "unrelated",
            "completely different text"
        ));
        // Single-token goal needs just that one hit.
        assert!(has_lexical_overlap("invoices", "", "all invoices live here"));
    }

    #[test]
    fn test_extract_scenario_prefers_labeled_block() {
        let content = format!(
            "```json\n{{\"name\":\"other\",\"steps\":[{{\"type\":\"click\",\"selector\":\"#a\"}}]}}\n```\n\n{}",
            skill_body(2)
        );
        let scenario = extract_scenario(&content).unwrap();
        assert_eq!(scenario.name, "expense");
        assert_eq!(scenario.steps.len(), 2);
    }

    #[test]
    fn test_extract_scenario_balanced_brace_recovery() {
        // Trailing junk after the object breaks plain parsing.
        let content = "```json\n{\"name\":\"s\",\"steps\":[{\"type\":\"navigate\",\"url\":\"https://a\"}]}\ntrailing junk\n```\n";
        let scenario = extract_scenario(content).unwrap();
        assert_eq!(scenario.name, "s");
    }

    #[test]
    fn test_extract_scenario_rejects_stepless() {
        let content = "```json\n{\"name\":\"empty\",\"steps\":[]}\n```\n";
        assert!(extract_scenario(content).is_none());
    }

    #[test]
    fn test_extract_balanced_json_honors_strings() {
        let text = r#"noise {"a": "brace } in string", "b": {"c": 1}} tail"#;
        let json = extract_balanced_json(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["b"]["c"], 1);
    }

    #[tokio::test]
    async fn test_low_relevance_no_overlap_rejected() {
        let store = MockStore::searching(vec![entry(
            "m1",
            "unrelated procedure",
            skill_body(3).replace("expense", "zzz"),
            0.54,
        )]);
        let matcher = SkillMatcher::new(std::sync::Arc::new(store), "ws".to_string());
        let best = matcher.find_best("qqqq wwww eeee").await.unwrap();
        assert!(best.is_none());
    }

    #[tokio::test]
    async fn test_high_relevance_without_overlap_accepted() {
        let store = MockStore::searching(vec![entry(
            "m1",
            "zzz",
            skill_body(3).replace("expense", "zzz"),
            0.61,
        )]);
        let matcher = SkillMatcher::new(std::sync::Arc::new(store), "ws".to_string());
        let best = matcher.find_best("qqqq wwww eeee").await.unwrap().unwrap();
        assert!(!best.overlap);
        assert_eq!(best.entry_id, "m1");
    }

    #[tokio::test]
    async fn test_overlap_outranks_relevance() {
        let store = MockStore::searching(vec![
            entry("hi-score", "zzz", skill_body(5).replace("expense", "zzz"), 0.9),
            entry("overlap", "Submit expense report", skill_body(3), 0.6),
        ]);
        let matcher = SkillMatcher::new(std::sync::Arc::new(store), "ws".to_string());
        let best = matcher
            .find_best("submit expense report")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.entry_id, "overlap");
        assert!(best.overlap);
        assert_eq!(best.scenario.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_step_count_breaks_ties() {
        let mut small = skill_body(2);
        small = small.replace("\"name\":\"expense\"", "\"name\":\"small\"");
        let store = MockStore::searching(vec![
            entry("small", "Submit expense report", small, 0.6),
            entry("big", "Submit expense report", skill_body(4), 0.6),
        ]);
        let matcher = SkillMatcher::new(std::sync::Arc::new(store), "ws".to_string());
        let best = matcher
            .find_best("submit expense report")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.entry_id, "big");
    }

    #[tokio::test]
    async fn test_unprocessable_falls_back_to_list() {
        let store = MockStore::unprocessable_with_list(vec![entry(
            "m1",
            "Submit expense report",
            skill_body(3),
            0.99, // score from a stale index; fallback zeroes it
        )]);
        let store = std::sync::Arc::new(store);
        let matcher = SkillMatcher::new(store.clone(), "ws".to_string());
        let best = matcher
            .find_best("submit expense report")
            .await
            .unwrap()
            .unwrap();
        assert!(*store.list_called.lock());
        assert_eq!(best.relevance, 0.0);
        assert!(best.overlap);
    }

    #[tokio::test]
    async fn test_entries_without_scenarios_skipped() {
        let store = MockStore::searching(vec![entry(
            "m1",
            "Submit expense report",
            "Just prose, no fenced scenario.".to_string(),
            0.9,
        )]);
        let matcher = SkillMatcher::new(std::sync::Arc::new(store), "ws".to_string());
        assert!(matcher
            .find_best("submit expense report")
            .await
            .unwrap()
            .is_none());
    }
}
