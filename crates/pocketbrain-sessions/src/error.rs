use thiserror::Error;

/// Errors that can occur while driving a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Neither resume nor create yielded a usable session id.
    #[error("no session ID")]
    NoSessionId,

    /// The chat already has an open session; route a follow-up instead.
    #[error("session already active: {key}")]
    AlreadyActive { key: String },

    /// The prompt run failed before or after streaming.
    #[error("prompt failed: {0}")]
    Prompt(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
