use crate::approval::ProposalQueue;
use crate::auth::TokenCache;
use crate::config::AppConfig;
use crate::questions::QuestionFlow;
use parking_lot::RwLock;
use std::sync::Arc;

/// Application global state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    /// Proposals awaiting human decisions.
    pub proposals: Arc<ProposalQueue>,
    /// The single active structured-question set.
    pub questions: Arc<QuestionFlow>,
    /// Single-slot auth token cache, injectable so tests reset it.
    pub token_cache: Arc<TokenCache>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            proposals: Arc::new(ProposalQueue::new()),
            questions: Arc::new(QuestionFlow::new()),
            token_cache: Arc::new(TokenCache::new()),
        }
    }

    /// Apply new settings: persisted tokens may no longer be valid, so the
    /// cache drops its slot.
    pub fn apply_config(&self, config: AppConfig) {
        *self.config.write() = config;
        self.token_cache.invalidate();
    }
}
