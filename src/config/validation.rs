use crate::auth::tabs::origin_of;
use crate::config::schema::{AppConfig, AuthMode};
use crate::error::{AgentdeckError, Result};

/// Placeholder the settings UI ships as the manual-token default. It is
/// never a valid credential.
pub const MANUAL_TOKEN_PLACEHOLDER: &str = "paste-your-token-here";

/// Validate a configuration before it is applied.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.backend.base_url.trim().is_empty() {
        return Err(AgentdeckError::Validation(
            "Backend base URL must not be empty".to_string(),
        ));
    }

    if origin_of(&config.backend.base_url).is_none() {
        return Err(AgentdeckError::Validation(format!(
            "Backend base URL is not a valid origin: {}",
            config.backend.base_url
        )));
    }

    if config.auth.mode == AuthMode::Manual {
        match config.auth.manual_token.as_deref() {
            None => {
                return Err(AgentdeckError::Validation(
                    "Manual auth mode requires a token".to_string(),
                ))
            }
            Some(token) if token.trim().is_empty() || token == MANUAL_TOKEN_PLACEHOLDER => {
                return Err(AgentdeckError::Validation(
                    "Manual auth token is not set".to_string(),
                ))
            }
            Some(_) => {}
        }
    }

    if !config.gateway.url.starts_with("ws://") && !config.gateway.url.starts_with("wss://") {
        return Err(AgentdeckError::Validation(format!(
            "Gateway URL must be a ws:// or wss:// endpoint: {}",
            config.gateway.url
        )));
    }

    Ok(())
}
