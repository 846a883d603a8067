//! Authentication token resolution.
//!
//! Resolves the bearer token for backend requests: a single-slot cache
//! keyed by origin, then ranked candidate tabs probed over a fixed set of
//! storage keys, then the manually configured token. Failures carry a
//! distinct user-facing reason per cause.

use crate::auth::jwt;
use crate::auth::tabs::{origin_of, rank_candidate_tabs, TabProvider};
use crate::config::validation::MANUAL_TOKEN_PLACEHOLDER;
use crate::config::{AuthConfig, AuthMode};
use crate::error::AgentdeckError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Storage keys probed on each candidate tab, in preference order.
pub const TOKEN_STORAGE_KEYS: [&str; 5] = ["access_token", "auth_token", "token", "id_token", "jwt"];

/// Cached expiry never reaches closer than this to a JWT `exp`.
pub const JWT_SAFETY_MARGIN_SECS: u64 = 60;

/// One cached token, keyed by origin.
#[derive(Debug, Clone)]
pub struct TokenCacheEntry {
    pub origin: String,
    pub token: String,
    /// Unix seconds
    pub expires_at: u64,
}

/// Single-slot, injectable token cache. Explicit state so tests can reset
/// it deterministically.
#[derive(Default)]
pub struct TokenCache {
    slot: Mutex<Option<TokenCacheEntry>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hit requires the same origin and an unexpired timestamp.
    pub fn get(&self, origin: &str, now_secs: u64) -> Option<String> {
        let slot = self.slot.lock();
        slot.as_ref()
            .filter(|entry| entry.origin == origin && now_secs < entry.expires_at)
            .map(|entry| entry.token.clone())
    }

    pub fn put(&self, entry: TokenCacheEntry) {
        *self.slot.lock() = Some(entry);
    }

    /// Called on settings save, on leaving cookie auth, and after a failed
    /// authorized request.
    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }

    pub fn peek(&self) -> Option<TokenCacheEntry> {
        self.slot.lock().clone()
    }
}

/// Why resolution failed. Each variant maps to its own user-facing
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    InvalidBaseUrl,
    NoCandidateTabs,
    TokenNotFound,
    /// Tab enumeration or storage access failed in the host environment.
    Host(String),
}

impl ResolveError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ResolveError::InvalidBaseUrl => {
                "The backend base URL is not valid; check the connection settings."
            }
            ResolveError::NoCandidateTabs => {
                "No open tab matches the backend origin; open the app and sign in."
            }
            ResolveError::TokenNotFound => {
                "No session token was found on the matching tabs; sign in again."
            }
            ResolveError::Host(_) => "The browser did not allow reading open tabs.",
        }
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Host(detail) => write!(f, "{} ({})", self.user_message(), detail),
            _ => f.write_str(self.user_message()),
        }
    }
}

impl From<ResolveError> for AgentdeckError {
    fn from(e: ResolveError) -> Self {
        AgentdeckError::Unauthorized(e.to_string())
    }
}

/// Resolves and caches the bearer token for a target origin.
pub struct AuthTokenResolver {
    cache: Arc<TokenCache>,
    tabs: Arc<dyn TabProvider>,
}

impl AuthTokenResolver {
    pub fn new(cache: Arc<TokenCache>, tabs: Arc<dyn TabProvider>) -> Self {
        Self { cache, tabs }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Resolve a token for the configured backend.
    ///
    /// `force` bypasses the cache (the single 401-triggered retry). Manual
    /// mode never scans tabs.
    pub async fn resolve(
        &self,
        auth: &AuthConfig,
        base_url: &str,
        force: bool,
    ) -> std::result::Result<String, ResolveError> {
        let origin = origin_of(base_url).ok_or(ResolveError::InvalidBaseUrl)?;
        let now = now_secs();

        if !force {
            if let Some(token) = self.cache.get(&origin, now) {
                tracing::debug!("Token cache hit for {}", origin);
                return Ok(token);
            }
        }

        if auth.mode == AuthMode::Manual {
            return manual_token(auth).ok_or(ResolveError::TokenNotFound);
        }

        let tabs = self
            .tabs
            .list_tabs()
            .await
            .map_err(|e| ResolveError::Host(e.to_string()))?;
        let candidates = rank_candidate_tabs(&origin, &tabs);

        if candidates.is_empty() {
            return manual_token(auth).ok_or(ResolveError::NoCandidateTabs);
        }

        for candidate in &candidates {
            for key in TOKEN_STORAGE_KEYS {
                match self.tabs.read_storage(&candidate.id, key).await {
                    Ok(Some(value)) if !value.trim().is_empty() => {
                        let token = normalize_token(&value);
                        let expires_at = compute_expiry(now, auth.token_ttl_secs, &token);
                        tracing::info!(
                            "Resolved token from tab {} key {} (expires in {}s)",
                            candidate.id,
                            key,
                            expires_at.saturating_sub(now)
                        );
                        self.cache.put(TokenCacheEntry {
                            origin,
                            token: token.clone(),
                            expires_at,
                        });
                        return Ok(token);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(
                            "Storage read failed on tab {} key {}: {}",
                            candidate.id,
                            key,
                            e
                        );
                    }
                }
            }
        }

        manual_token(auth).ok_or(ResolveError::TokenNotFound)
    }

    /// Drop any cached token, forcing the next resolution to re-discover.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }
}

/// The configured manual token, unless unset or still the placeholder.
fn manual_token(auth: &AuthConfig) -> Option<String> {
    auth.manual_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != MANUAL_TOKEN_PLACEHOLDER)
        .map(String::from)
}

fn normalize_token(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix("Bearer ")
        .unwrap_or(value)
        .trim_matches('"')
        .to_string()
}

/// Expiry = min(now + TTL, JWT `exp` − safety margin); the fixed TTL alone
/// when the token is not a parseable JWT or carries no `exp`.
pub(crate) fn compute_expiry(now_secs: u64, ttl_secs: u64, token: &str) -> u64 {
    let ttl_expiry = now_secs + ttl_secs;
    match jwt::decode_exp(token) {
        Some(exp) => ttl_expiry.min(exp.saturating_sub(JWT_SAFETY_MARGIN_SECS)),
        None => ttl_expiry,
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
