//! `pocketbrain-store` — durable SQLite-backed state.
//!
//! One [`Store`] owns one SQLite connection behind a mutex: all writes
//! are serialized through that single logical writer, which is what
//! makes the cursor and task invariants crash-safe. Every schema
//! element is created idempotently on open, so there is no separate
//! migration step.
//!
//! Tables: `chats`, `messages`, `cursors`, `sessions`, `tasks`,
//! `outbox`. Timestamps are stored as RFC 3339 TEXT — cursor
//! comparisons are plain string comparisons.

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::Store;
