//! `pocketbrain-scheduler` — cron / interval / one-shot task execution.
//!
//! The engine polls the store for due tasks, re-reads each row to
//! dedupe against concurrent mutations, and hands execution thunks to
//! the queue so scheduled work obeys the same per-chat exclusivity and
//! global concurrency bound as live messages. Next-run computation is
//! drift-free: an interval task that fires late still anchors its next
//! firing on the previous planned time.

pub mod engine;
pub mod error;
pub mod runner;
pub mod schedule;

pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use runner::TaskDeps;
