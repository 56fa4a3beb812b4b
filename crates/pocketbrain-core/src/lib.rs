//! `pocketbrain-core` — shared types, configuration and error codes.
//!
//! Everything in here is dependency-light on purpose: every other crate
//! in the workspace pulls this one in, so it must never grow a heavy
//! runtime dependency of its own.

pub mod config;
pub mod error;
pub mod sanitize;
pub mod types;

pub use config::PocketBrainConfig;
pub use error::{PocketBrainError, Result};
pub use types::{
    Chat, ChatMessage, ContextMode, OutboxEntry, Schedule, ScheduledTask, TaskStatus,
};
