use thiserror::Error;

/// Errors that can occur while processing IPC files.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid envelope: {0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(#[from] pocketbrain_store::StoreError),
}

pub type Result<T> = std::result::Result<T, IpcError>;
