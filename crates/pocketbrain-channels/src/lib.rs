//! `pocketbrain-channels` — the messaging-channel seam.
//!
//! The control plane only ever sees the [`channel::Channel`] contract;
//! concrete transports (WhatsApp, …) live outside this repository. The
//! [`router::ChannelRouter`] picks the adapter that owns a jid, parks
//! undeliverable messages in the store outbox, and drains that outbox
//! with backoff. [`mock::MockChannel`] is the in-tree development
//! adapter.

pub mod channel;
pub mod error;
pub mod events;
pub mod mock;
pub mod router;

pub use channel::Channel;
pub use error::ChannelError;
pub use events::{ChannelEvent, ChannelEventSender};
pub use router::ChannelRouter;
