use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem failure while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No chat with the given jid or folder is registered.
    #[error("chat not found: {key}")]
    ChatNotFound { key: String },

    /// No task with the given id exists.
    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    /// A stored row could not be decoded back into its domain type.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
