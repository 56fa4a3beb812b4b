use async_trait::async_trait;

use crate::error::ChannelError;

/// Common interface implemented by every channel adapter.
///
/// Implementations must be `Send + Sync`: one adapter instance is
/// shared behind an `Arc` and driven from multiple Tokio tasks, so all
/// connection state lives behind interior mutability.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"whatsapp"`).
    ///
    /// The name keys the outbox rows belonging to this adapter and must
    /// be unique across all registered adapters.
    fn name(&self) -> &str;

    /// Whether this adapter will accept `send` calls for the given jid.
    fn owns(&self, jid: &str) -> bool;

    /// Establish the connection to the external service.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Deliver text to a jid. The core hands over plain text; chunking,
    /// length limits and per-chunk delays are the adapter's business.
    async fn send(&self, jid: &str, text: &str) -> Result<(), ChannelError>;

    /// Optional typing indicator. Default is a no-op.
    async fn set_typing(&self, _jid: &str, _typing: bool) -> Result<(), ChannelError> {
        Ok(())
    }
}
