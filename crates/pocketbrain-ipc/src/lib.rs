//! `pocketbrain-ipc` — the agent→host side-effect surface.
//!
//! Agents request host effects by dropping JSON envelopes into
//! `ipc/<chat_folder>/{messages,tasks}/`. The parent directory name is
//! the requester's identity — nothing in the file body can contradict
//! it, and only the designated main chat may act across folders.
//! Writes are atomic (tmp + rename), consumption deletes the file, and
//! anything unparseable is quarantined under `ipc/errors/`.

pub mod envelope;
pub mod error;
pub mod snapshot;
pub mod watcher;

pub use envelope::{derive_task_id, IpcEnvelope};
pub use error::{IpcError, Result};
pub use watcher::IpcWatcher;
