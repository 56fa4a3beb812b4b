use serde::Deserialize;
use sha2::{Digest, Sha256};

/// A single-file JSON action written by the agent's tools.
///
/// Field names follow the wire format exactly. `chat_folder` and
/// `created_by` are logging hints only — authority always derives from
/// the directory the file was found in, never from the body.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEnvelope {
    /// Agent-initiated outbound message.
    Message {
        chat_jid: String,
        text: String,
        #[serde(default)]
        sender: Option<String>,
        #[serde(default)]
        chat_folder: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// Create a scheduled task.
    ScheduleTask {
        prompt: String,
        schedule_type: String,
        schedule_value: String,
        #[serde(default = "default_context_mode")]
        context_mode: String,
        target_jid: String,
        #[serde(default)]
        created_by: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },

    PauseTask {
        task_id: String,
        #[serde(default)]
        chat_folder: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },

    ResumeTask {
        task_id: String,
        #[serde(default)]
        chat_folder: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },

    CancelTask {
        task_id: String,
        #[serde(default)]
        chat_folder: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
}

fn default_context_mode() -> String {
    "group".to_string()
}

/// Derive a deterministic task id from envelope content.
///
/// A crash between applying a `schedule_task` and deleting its file
/// makes the watcher reprocess it on restart; hashing the identifying
/// fields (plus the writer-stamped timestamp) means the replay upserts
/// the same row instead of minting a duplicate.
pub fn derive_task_id(
    source_folder: &str,
    prompt: &str,
    schedule_type: &str,
    schedule_value: &str,
    target_jid: &str,
    timestamp: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        source_folder,
        prompt,
        schedule_type,
        schedule_value,
        target_jid,
        timestamp,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    format!("task-{}", hex::encode(&hasher.finalize()[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_envelope_parses() {
        let json = r#"{"type":"message","chat_jid":"123@g.us","text":"hi","timestamp":"2026-01-01T00:00:00Z"}"#;
        let env: IpcEnvelope = serde_json::from_str(json).unwrap();
        assert!(matches!(env, IpcEnvelope::Message { chat_jid, text, .. }
            if chat_jid == "123@g.us" && text == "hi"));
    }

    #[test]
    fn schedule_envelope_defaults_context_mode() {
        let json = r#"{"type":"schedule_task","prompt":"p","schedule_type":"interval",
                       "schedule_value":"60000","target_jid":"123@g.us"}"#;
        let env: IpcEnvelope = serde_json::from_str(json).unwrap();
        assert!(matches!(env, IpcEnvelope::ScheduleTask { context_mode, .. }
            if context_mode == "group"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let json = r#"{"type":"reboot_host"}"#;
        assert!(serde_json::from_str::<IpcEnvelope>(json).is_err());
    }

    #[test]
    fn derived_ids_are_stable_and_distinct() {
        let a = derive_task_id("alpha", "p", "interval", "60000", "123@g.us", "t1");
        let b = derive_task_id("alpha", "p", "interval", "60000", "123@g.us", "t1");
        let c = derive_task_id("alpha", "p", "interval", "60000", "123@g.us", "t2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("task-"));
    }
}
