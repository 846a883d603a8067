use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentdeckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Agent command failed: {0}")]
    Agent(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AgentdeckError {
    /// The backend rejected the request as unprocessable (HTTP 422).
    /// Callers use this to pick the unfiltered-list fallback.
    pub fn is_unprocessable(&self) -> bool {
        matches!(self, AgentdeckError::Backend(msg) if msg.starts_with("422"))
    }

    /// The backend rejected the request as unauthorized (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AgentdeckError::Unauthorized(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentdeckError>;
