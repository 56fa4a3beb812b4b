use serde::{Deserialize, Serialize};

/// An event observed on the agent runtime's event stream.
///
/// Consumers filter by `session_id` (and `message_id` where present);
/// the stream multiplexes every live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// A text part of an in-flight message changed. Carries either an
    /// incremental `delta` or the full `text` replacing the part so far.
    #[serde(rename = "part.updated")]
    PartUpdated {
        session_id: String,
        message_id: String,
        part_id: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },

    /// The target message's metadata changed; `error` is set when the
    /// runtime failed the message.
    #[serde(rename = "message.updated")]
    MessageUpdated {
        session_id: String,
        message_id: String,
        #[serde(default)]
        error: Option<String>,
    },

    /// The session has no more work in flight.
    #[serde(rename = "session.idle")]
    SessionIdle { session_id: String },
}

/// One ordered text part of a canonical message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePart {
    pub id: String,
    pub text: String,
}

/// Canonical message metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageInfo {
    #[serde(default)]
    pub error: Option<String>,
}

/// The canonical form of a message, fetched after the stream settles.
///
/// Parts are in declared order; concatenating their text yields the
/// authoritative reply, which is preferred over whatever the stream
/// accumulated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageRecord {
    pub info: MessageInfo,
    pub parts: Vec<MessagePart>,
}

impl MessageRecord {
    /// Concatenate text parts in declared order.
    pub fn text(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }
}
