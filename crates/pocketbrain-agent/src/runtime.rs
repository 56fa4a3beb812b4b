use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::Result;
use crate::events::{AgentEvent, MessageRecord};

/// Boxed stream of runtime events, multiplexing all live sessions.
pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Contract the control plane requires from an LLM-agent runtime.
///
/// Implementations must be `Send + Sync` — one runtime instance is
/// shared across every in-flight session task.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create a fresh session and return its opaque id.
    async fn create_session(&self, title: &str) -> Result<String>;

    /// Probe whether a previously issued session id is still valid.
    ///
    /// Returns `Err(AgentError::StaleSession)` when the runtime no
    /// longer recognises the id; callers recover by recreating.
    async fn get_session(&self, session_id: &str) -> Result<()>;

    /// Discard a session. Best-effort: callers fire-and-forget this
    /// when cleaning up stale ids.
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Submit a prompt. Returns as soon as the runtime accepts it;
    /// results arrive on the event stream under `message_id`.
    async fn prompt_async(&self, session_id: &str, message_id: &str, text: &str) -> Result<()>;

    /// Subscribe to the runtime's event stream. Each call returns an
    /// independent subscription; subscribe *before* submitting the
    /// prompt whose events you intend to observe.
    fn events(&self) -> EventStream;

    /// Fetch the canonical form of a message after the stream settles.
    async fn get_message(&self, session_id: &str, message_id: &str) -> Result<MessageRecord>;

    /// Best-effort interrupt of whatever the session is doing.
    async fn abort(&self, session_id: &str) -> Result<()>;
}
