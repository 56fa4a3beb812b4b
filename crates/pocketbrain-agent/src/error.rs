use thiserror::Error;

/// Errors that can occur while driving the agent runtime.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The runtime no longer recognises the given session id.
    #[error("stale session: {id}")]
    StaleSession { id: String },

    /// The runtime accepted a session request but returned no id.
    #[error("no session ID")]
    MissingSessionId,

    /// Transport-level failure (HTTP error, connection refused, …).
    #[error("transport error: {0}")]
    Transport(String),

    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// An operation exceeded its allowed time budget.
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
