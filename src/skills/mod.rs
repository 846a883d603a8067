pub mod compiler;
pub mod matcher;
pub mod scenario;

pub use compiler::{SkillDraft, MAX_SKILL_CONTENT_LENGTH};
pub use matcher::{MemoryEntry, SkillMatch, SkillMatcher, SkillStore};
pub use scenario::{RpaScenario, RpaStep};

use crate::error::Result;
use async_trait::async_trait;

/// Write side of the skill library.
#[async_trait]
pub trait SkillSink: Send + Sync {
    /// Persist a compiled skill document, returning the new entry id.
    async fn persist_skill(
        &self,
        content: &str,
        workspace_id: &str,
        tags: &[String],
        source: &str,
    ) -> Result<String>;
}
