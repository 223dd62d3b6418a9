//! Error types for the Hearth gateway

use thiserror::Error;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Hearth gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine did not answer within its tier timeout
    #[error("engine {engine} timed out after {timeout_ms}ms")]
    EngineTimeout { engine: String, timeout_ms: u64 },

    /// Engine outage or protocol failure
    #[error("engine {engine} failed: {message}")]
    EngineFailure { engine: String, message: String },

    /// Transcript or audio unusable (empty, too short, gibberish)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Home Assistant refused or failed the action
    #[error("action failed: {0}")]
    ActionExecution(String),

    /// Result from a cancelled operation arrived after an interruption
    #[error("stale callback discarded (sequence {sequence})")]
    StaleCallback { sequence: u64 },

    /// Unknown session id
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session is already live in the room
    #[error("room busy: {0}")]
    RoomBusy(String),

    /// Audio decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build an engine failure from any displayable cause
    pub fn engine(engine: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::EngineFailure {
            engine: engine.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error only means "skip to the next tier"
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::EngineTimeout { .. })
    }
}
