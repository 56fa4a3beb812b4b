use std::sync::Arc;
use std::time::Duration;

/// Immutable identity of the chat a session serves. Feeds the context
/// prefix and never changes for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct SessionChat {
    pub jid: String,
    pub folder: String,
    pub name: String,
    pub is_main: bool,
}

/// Everything needed to open (or resume) a session and run its first
/// prompt.
#[derive(Debug, Clone)]
pub struct SessionInput {
    /// Key under which the ActiveSession registers. The chat jid for
    /// conversational sessions; a synthetic `task:<id>` key for
    /// isolated task sessions so chat follow-ups can never route into
    /// them.
    pub registry_key: String,

    pub chat: SessionChat,

    /// Persisted session id to resume, if any. A stale id is replaced
    /// transparently.
    pub session_id: Option<String>,

    /// Body of the first prompt (already formatted by the caller).
    pub prompt: String,

    /// Prepend the scheduled-task marker so the agent knows this run is
    /// autonomous.
    pub is_scheduled_task: bool,

    /// Chat-specific instructions, injected only when a brand-new
    /// session is created.
    pub instructions: Option<String>,
}

/// What a session emits through its output sink.
#[derive(Debug, Clone)]
pub enum SessionOutput {
    /// A result-bearing reply; the owner sanitizes and delivers it.
    Text(String),

    /// Marker carrying the (possibly new) session id so the owner can
    /// persist the binding. Carries no result and must not reset idle
    /// timers.
    SessionUpdate { session_id: String },
}

/// Callback wired to a session for its whole lifetime; follow-ups emit
/// through the same sink as the first prompt.
pub type OutputSink = Arc<dyn Fn(SessionOutput) + Send + Sync>;

/// Deadlines for externally observable runtime calls.
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    /// Bound on `get_session` / `create_session` during resolution.
    pub init: Duration,
    /// Bound on waiting for the event stream to settle.
    pub stream: Duration,
    /// Bound on the canonical `get_message` fetch.
    pub finalize: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(15),
            stream: Duration::from_secs(120),
            finalize: Duration::from_secs(30),
        }
    }
}
