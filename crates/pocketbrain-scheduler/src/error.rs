use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The provided schedule definition is invalid.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The configured timezone name is not a valid IANA identifier.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Underlying persistence failure.
    #[error("store error: {0}")]
    Store(#[from] pocketbrain_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
