use tokio::sync::mpsc;

use pocketbrain_core::types::ChatMessage;

/// An event pushed by a channel adapter into the core.
///
/// Adapters push into a bounded mpsc queue consumed by the
/// orchestrator; the receive loop of a transport never does anything
/// slower than this enqueue.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A new message was observed, including the bot's own echoes.
    Inbound { message: ChatMessage },

    /// Opportunistic chat metadata, delivered even for chats that are
    /// not (yet) registered, so liveness can be tracked ahead of
    /// registration.
    Metadata {
        chat_jid: String,
        timestamp: String,
        name: Option<String>,
        is_group: Option<bool>,
    },
}

/// Sender half handed to adapters at construction time.
pub type ChannelEventSender = mpsc::Sender<ChannelEvent>;
