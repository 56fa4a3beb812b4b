//! `pocketbrain-queue` — per-chat admission control.
//!
//! One slot per chat, a global ceiling on simultaneously held slots,
//! task-before-message drain priority, and exponential-backoff retries
//! for failed message batches. The queue is the system's backpressure
//! choke point: channels can outrun the agent indefinitely, everything
//! is persisted, and the processed cursor simply lags until slots free
//! up.

pub mod queue;

pub use queue::{BatchHandler, ChatQueue, QueueSettings, TaskFuture, TaskThunk};
