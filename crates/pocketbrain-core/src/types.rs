use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation the assistant responds in.
///
/// `jid` is the opaque identifier assigned by the owning channel.
/// `folder` is a short slug chosen at registration; it doubles as the
/// chat's filesystem/IPC identity and is immutable for the chat's
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub jid: String,
    pub name: String,
    pub folder: String,
    /// At most one chat carries this flag; it grants cross-folder IPC rights.
    pub is_main: bool,
    /// ISO-8601 timestamp of registration.
    pub added_at: String,
}

/// An inbound (or echo-of-self) message observed on a channel.
///
/// Keyed by `(chat_jid, id)`. Persisted on arrival, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_jid: String,
    pub id: String,
    pub sender: String,
    pub sender_name: String,
    pub content: String,
    /// ISO-8601 timestamp assigned by the channel. Total-ordered within
    /// a chat — cursor comparisons are plain string comparisons.
    pub timestamp: String,
    pub is_from_me: bool,
    pub is_bot_message: bool,
}

/// Defines when and how often a scheduled task fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// 5-field cron expression, evaluated under the configured timezone.
    Cron { expr: String },

    /// Repeat every N milliseconds, anchored to the previous planned run.
    Interval { every_ms: u64 },

    /// Fire exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },
}

impl Schedule {
    /// Split into the `(kind, value)` string pair used by the store
    /// columns and the IPC wire format.
    pub fn parts(&self) -> (&'static str, String) {
        match self {
            Schedule::Cron { expr } => ("cron", expr.clone()),
            Schedule::Interval { every_ms } => ("interval", every_ms.to_string()),
            Schedule::Once { at } => ("once", at.to_rfc3339()),
        }
    }

    /// Reassemble from the `(kind, value)` pair.
    ///
    /// This is a syntactic parse only — semantic validation (cron
    /// parseability, interval > 0, once in the future) happens at the
    /// scheduler boundary where tasks are born.
    pub fn from_parts(kind: &str, value: &str) -> std::result::Result<Self, String> {
        match kind {
            "cron" => Ok(Schedule::Cron {
                expr: value.to_string(),
            }),
            "interval" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| format!("interval value is not an integer: {value}"))?;
                Ok(Schedule::Interval { every_ms: ms })
            }
            "once" => {
                let at = DateTime::parse_from_rfc3339(value)
                    .map_err(|e| format!("once value is not a timestamp: {e}"))?
                    .with_timezone(&Utc);
                Ok(Schedule::Once { at })
            }
            other => Err(format!("unknown schedule kind: {other}")),
        }
    }
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible to fire when next_run arrives.
    Active,
    /// Retained but never due.
    Paused,
    /// Exhausted (Once tasks after their single run).
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Which agent session a scheduled task runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Join the chat's persisted session (created lazily if absent).
    Group,
    /// Always force a fresh, private session.
    Isolated,
}

impl std::fmt::Display for ContextMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextMode::Group => "group",
            ContextMode::Isolated => "isolated",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "group" => Ok(ContextMode::Group),
            "isolated" => Ok(ContextMode::Isolated),
            other => Err(format!("unknown context mode: {other}")),
        }
    }
}

/// A persisted scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Primary key. Host-generated UUID, or derived deterministically
    /// from the IPC envelope that created the task.
    pub id: String,
    pub chat_folder: String,
    pub chat_jid: String,
    pub prompt: String,
    pub schedule: Schedule,
    pub context_mode: ContextMode,
    /// ISO-8601 timestamp of the next planned firing. Never null while
    /// the task is active.
    pub next_run: Option<String>,
    /// ISO-8601 timestamp of the most recent firing, if any.
    pub last_run: Option<String>,
    /// Truncated result (or error) of the most recent firing.
    pub last_result: Option<String>,
    pub status: TaskStatus,
    pub created_at: String,
}

/// A pending outbound message retained for a disconnected channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub channel: String,
    pub recipient: String,
    pub text: String,
    pub attempts: u32,
    /// ISO-8601 timestamp before which the entry must not be retried.
    pub next_retry: String,
    pub created_at: String,
}
