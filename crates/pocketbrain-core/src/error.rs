use thiserror::Error;

#[derive(Debug, Error)]
pub enum PocketBrainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Agent runtime error: {0}")]
    AgentRuntime(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authorization denied: {reason}")]
    Authorization { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PocketBrainError {
    /// Short error code string used in structured log records.
    pub fn code(&self) -> &'static str {
        match self {
            PocketBrainError::Config(_) => "CONFIG_ERROR",
            PocketBrainError::Database(_) => "DATABASE_ERROR",
            PocketBrainError::Channel { .. } => "CHANNEL_ERROR",
            PocketBrainError::AgentRuntime(_) => "AGENT_RUNTIME_ERROR",
            PocketBrainError::Validation(_) => "VALIDATION_ERROR",
            PocketBrainError::Authorization { .. } => "AUTHORIZATION_DENIED",
            PocketBrainError::Serialization(_) => "SERIALIZATION_ERROR",
            PocketBrainError::Io(_) => "IO_ERROR",
            PocketBrainError::Timeout { .. } => "TIMEOUT",
            PocketBrainError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PocketBrainError>;
