//! HTTP client for the chat backend.
//!
//! Everything outbound goes through here: proposal confirmation, chat
//! messages (streamed and plain), and the skill-memory endpoints. Requests
//! carry the resolved bearer token; a 401 under cookie auth forces exactly
//! one token re-resolution before giving up.

use crate::approval::{Decision, Proposal, ProposalConfirmer};
use crate::auth::AuthTokenResolver;
use crate::config::{AppConfig, AuthMode};
use crate::error::{AgentdeckError, Result};
use crate::skills::matcher::{MemoryEntry, SkillStore};
use crate::skills::SkillSink;
use crate::stream::{ChunkHandler, StreamDispatcher};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BackendClient {
    http: reqwest::Client,
    config: Arc<RwLock<AppConfig>>,
    resolver: Arc<AuthTokenResolver>,
    /// Session id replayed with outbound chat requests. Updated from
    /// `done` chunks by the session glue.
    session_id: Mutex<Option<String>>,
}

impl BackendClient {
    pub fn new(config: Arc<RwLock<AppConfig>>, resolver: Arc<AuthTokenResolver>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            resolver,
            session_id: Mutex::new(None),
        }
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.lock() = session_id;
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn base_url(&self) -> String {
        self.config
            .read()
            .backend
            .base_url
            .trim_end_matches('/')
            .to_string()
    }

    async fn token(&self, force: bool) -> Result<String> {
        let (auth, base_url) = {
            let config = self.config.read();
            (config.auth.clone(), config.backend.base_url.clone())
        };
        self.resolver
            .resolve(&auth, &base_url, force)
            .await
            .map_err(Into::into)
    }

    /// Send an authorized request, retrying once with a forced token
    /// refresh when the backend answers 401 under cookie auth.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let base = self.base_url();
        let token = self.token(false).await?;
        let response = build(&self.http, &base)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AgentdeckError::Transport(format!("request failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if self.config.read().auth.mode != AuthMode::Cookie {
            return Err(AgentdeckError::Unauthorized(
                "The backend rejected the configured token.".to_string(),
            ));
        }

        tracing::info!("Received 401, forcing one token re-resolution");
        self.resolver.invalidate();
        let token = self.token(true).await?;
        let response = build(&self.http, &base)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AgentdeckError::Transport(format!("request failed: {}", e)))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AgentdeckError::Unauthorized(
                "The backend rejected the session token.".to_string(),
            ));
        }
        Ok(response)
    }

    /// Map a non-success response to a backend error carrying the status
    /// code (the 422 fallback keys off that prefix).
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentdeckError::Backend(format!(
            "{} {}",
            status.as_u16(),
            body
        )))
    }

    /// List proposals still awaiting a decision.
    pub async fn pending_proposals(&self) -> Result<Vec<Proposal>> {
        #[derive(Deserialize)]
        struct PendingResponse {
            #[serde(default)]
            proposals: Vec<Proposal>,
        }

        let response = self
            .send_authorized(|http, base| http.get(format!("{}/api/proposals/pending", base)))
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: PendingResponse = response
            .json()
            .await
            .map_err(|e| AgentdeckError::Protocol(format!("invalid proposals payload: {}", e)))?;
        Ok(parsed.proposals)
    }

    /// Send one outbound chat message without streaming the reply.
    pub async fn send_chat_message(&self, text: &str) -> Result<()> {
        let session_id = self.session_id();
        let response = self
            .send_authorized(|http, base| {
                http.post(format!("{}/api/chat/messages", base)).json(&serde_json::json!({
                    "content": text,
                    "session_id": session_id,
                }))
            })
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Send a chat message and dispatch the streamed reply into a handler.
    pub async fn stream_chat<H: ChunkHandler>(&self, text: &str, handler: &H) -> Result<()> {
        let session_id = self.session_id();
        let response = self
            .send_authorized(|http, base| {
                http.post(format!("{}/api/chat/stream", base)).json(&serde_json::json!({
                    "content": text,
                    "session_id": session_id,
                }))
            })
            .await?;
        let response = Self::check_status(response).await?;

        let mut dispatcher = StreamDispatcher::new();
        dispatcher.dispatch(response.bytes_stream(), handler).await
    }
}

#[async_trait]
impl ProposalConfirmer for BackendClient {
    async fn confirm(&self, proposal: &Proposal, decision: Decision) -> Result<()> {
        let response = self
            .send_authorized(|http, base| {
                http.post(format!(
                    "{}/api/proposals/{}/{}",
                    base,
                    proposal.id,
                    decision.as_str()
                ))
                .json(&proposal.payload)
            })
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn send_confirmation(&self, message: &str) -> Result<()> {
        self.send_chat_message(message).await
    }
}

#[async_trait]
impl SkillStore for BackendClient {
    async fn search_skills(
        &self,
        query: &str,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(default)]
            entries: Vec<MemoryEntry>,
        }

        let response = self
            .send_authorized(|http, base| {
                http.post(format!("{}/api/memories/search", base)).json(&serde_json::json!({
                    "query": query,
                    "workspace_id": workspace_id,
                    "type": "skill",
                    "limit": limit,
                }))
            })
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AgentdeckError::Protocol(format!("invalid search payload: {}", e)))?;
        Ok(parsed.entries)
    }

    async fn list_skills(&self, workspace_id: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        #[derive(Deserialize)]
        struct ListResponse {
            #[serde(default)]
            entries: Vec<MemoryEntry>,
        }

        let workspace_id = workspace_id.to_string();
        let limit = limit.to_string();
        let response = self
            .send_authorized(|http, base| {
                http.get(format!("{}/api/memories", base)).query(&[
                    ("workspace_id", workspace_id.as_str()),
                    ("type", "skill"),
                    ("limit", limit.as_str()),
                ])
            })
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: ListResponse = response
            .json()
            .await
            .map_err(|e| AgentdeckError::Protocol(format!("invalid list payload: {}", e)))?;
        Ok(parsed.entries)
    }
}

#[async_trait]
impl SkillSink for BackendClient {
    async fn persist_skill(
        &self,
        content: &str,
        workspace_id: &str,
        tags: &[String],
        source: &str,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct CreateResponse {
            id: String,
        }

        let response = self
            .send_authorized(|http, base| {
                http.post(format!("{}/api/memories", base)).json(&serde_json::json!({
                    "content": content,
                    "workspace_id": workspace_id,
                    "type": "skill",
                    "tags": tags,
                    "source": source,
                }))
            })
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: CreateResponse = response
            .json()
            .await
            .map_err(|e| AgentdeckError::Protocol(format!("invalid create payload: {}", e)))?;
        tracing::info!("Persisted skill as memory {}", parsed.id);
        Ok(parsed.id)
    }
}
