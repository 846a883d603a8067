use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Authentication against the backend
    #[serde(default)]
    pub auth: AuthConfig,

    /// Execution agent gateway (duplex channel endpoint)
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// AI provider configuration forwarded to the execution agent
    #[serde(default)]
    pub ai: AiConfig,

    /// How AI-proposed actions are confirmed
    #[serde(default)]
    pub approval_mode: ApprovalMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            gateway: GatewayConfig::default(),
            ai: AiConfig::default(),
            approval_mode: ApprovalMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the chat backend (e.g. "https://deck.example.com")
    pub base_url: String,

    /// Shared workspace scope for skill-typed memory entries
    #[serde(default)]
    pub workspace_id: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            workspace_id: String::new(),
        }
    }
}

/// How the bearer token for backend requests is obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Discover a token by inspecting open tabs on the backend origin
    #[default]
    Cookie,
    /// Use the manually configured token only
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    /// Manually configured token, used as a fallback (or exclusively in
    /// manual mode). The UI ships a placeholder default that is never sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_token: Option<String>,

    /// Cache TTL for discovered tokens, seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Cookie,
            manual_token: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

fn default_token_ttl() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket URL of the execution agent gateway
    pub url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/agent".to_string(),
        }
    }
}

/// AI provider configuration. Sent along with start commands so the
/// execution agent runs against the user's selected provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Default model selection (format: "provider_id:model_name")
    pub default_llm: Option<String>,

    /// Providers keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_llm: None,
            providers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name for this provider
    pub name: String,

    /// Base URL for the API
    pub base_url: String,

    /// API key (optional for local providers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Available models for this provider
    #[serde(default)]
    pub models: Vec<String>,
}

/// Proposal confirmation mode. Switching to automatic clears any queued
/// proposals; the queue only exists in manual mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    #[default]
    Manual,
    Automatic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.auth.mode, AuthMode::Cookie);
        assert_eq!(config.auth.token_ttl_secs, 600);
        assert_eq!(config.approval_mode, ApprovalMode::Manual);
        assert!(config.ai.providers.is_empty());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.backend.base_url = "https://deck.example.com".to_string();
        config.auth.manual_token = Some("tok".to_string());
        config.ai.providers.insert(
            "local".to_string(),
            ProviderConfig {
                name: "Local".to_string(),
                base_url: "http://127.0.0.1:11434".to_string(),
                api_key: None,
                models: vec!["llama3".to_string()],
            },
        );

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.backend.base_url, "https://deck.example.com");
        assert_eq!(parsed.auth.manual_token.as_deref(), Some("tok"));
        assert_eq!(parsed.ai.providers["local"].models, vec!["llama3"]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[backend]\nbase_url = \"http://x\"\n").unwrap();
        assert_eq!(parsed.backend.base_url, "http://x");
        assert_eq!(parsed.auth.mode, AuthMode::Cookie);
        assert_eq!(parsed.gateway.url, "ws://127.0.0.1:8765/agent");
    }
}
