//! Scripted in-memory runtime for tests and offline development.
//!
//! Each queued [`ScriptedReply`] describes how the runtime behaves for
//! one prompt: what it streams, what the canonical message contains,
//! and whether anything fails along the way. With an empty script every
//! prompt succeeds with a fixed acknowledgement.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, MessageInfo, MessagePart, MessageRecord};
use crate::runtime::{AgentRuntime, EventStream};

/// Behaviour of the runtime for one prompt.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream a reply; the canonical message agrees with the stream.
    Text(String),

    /// Stream a reply but return an empty canonical message, forcing
    /// the caller onto its streamed-text fallback.
    StreamOnly(String),

    /// Stream text, then mark the canonical message as failed.
    CanonicalError {
        streamed: Option<String>,
        error: String,
    },

    /// Fail the prompt submission itself.
    PromptFailure(String),

    /// Stream an error payload on `message.updated`.
    StreamError(String),

    /// Complete cleanly with no text at all.
    Silent,
}

/// A prompt the mock accepted, as observed by tests.
#[derive(Debug, Clone)]
pub struct PromptRecord {
    pub session_id: String,
    pub message_id: String,
    pub text: String,
}

pub struct MockAgentRuntime {
    counter: AtomicUsize,
    script: Mutex<VecDeque<ScriptedReply>>,
    issued: Mutex<HashSet<String>>,
    stale: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
    prompts: Mutex<Vec<PromptRecord>>,
    canonical: Mutex<HashMap<(String, String), MessageRecord>>,
    events_tx: broadcast::Sender<AgentEvent>,
}

impl Default for MockAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentRuntime {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            counter: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            issued: Mutex::new(HashSet::new()),
            stale: Mutex::new(HashSet::new()),
            deleted: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            canonical: Mutex::new(HashMap::new()),
            events_tx,
        }
    }

    /// Queue the behaviour for the next prompt.
    pub fn script(&self, reply: ScriptedReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    /// Make `get_session` reject this id even if the mock issued it.
    pub fn mark_stale(&self, session_id: &str) {
        self.stale.lock().unwrap().insert(session_id.to_string());
    }

    /// Session ids passed to `delete_session` so far.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Session ids passed to `abort` so far.
    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    /// Every prompt the mock accepted, in submission order.
    pub fn prompts(&self) -> Vec<PromptRecord> {
        self.prompts.lock().unwrap().clone()
    }

    fn emit_stream(&self, session_id: &str, message_id: &str, reply: &ScriptedReply) {
        let tx = self.events_tx.clone();
        let session_id = session_id.to_string();
        let message_id = message_id.to_string();
        let reply = reply.clone();
        // Emitted from a spawned task so prompt_async returns before any
        // event lands, matching a real runtime's asynchrony.
        tokio::spawn(async move {
            let streamed = match &reply {
                ScriptedReply::Text(t) | ScriptedReply::StreamOnly(t) => Some(t.clone()),
                ScriptedReply::CanonicalError { streamed, .. } => streamed.clone(),
                _ => None,
            };
            if let Some(text) = streamed {
                let _ = tx.send(AgentEvent::PartUpdated {
                    session_id: session_id.clone(),
                    message_id: message_id.clone(),
                    part_id: "p0".to_string(),
                    text: None,
                    delta: Some(text),
                });
            }
            let error = match &reply {
                ScriptedReply::StreamError(e) => Some(e.clone()),
                _ => None,
            };
            let _ = tx.send(AgentEvent::MessageUpdated {
                session_id: session_id.clone(),
                message_id,
                error,
            });
            let _ = tx.send(AgentEvent::SessionIdle { session_id });
        });
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn create_session(&self, _title: &str) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-ses-{n}");
        self.issued.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    async fn get_session(&self, session_id: &str) -> Result<()> {
        let known = self.issued.lock().unwrap().contains(session_id);
        let stale = self.stale.lock().unwrap().contains(session_id);
        if !known || stale {
            return Err(AgentError::StaleSession {
                id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(session_id.to_string());
        self.issued.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn prompt_async(&self, session_id: &str, message_id: &str, text: &str) -> Result<()> {
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::Text("ok".to_string()));

        if let ScriptedReply::PromptFailure(reason) = &reply {
            return Err(AgentError::Transport(reason.clone()));
        }

        self.prompts.lock().unwrap().push(PromptRecord {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
        });

        let canonical = match &reply {
            ScriptedReply::Text(t) => MessageRecord {
                info: MessageInfo::default(),
                parts: vec![MessagePart {
                    id: "p0".to_string(),
                    text: t.clone(),
                }],
            },
            ScriptedReply::CanonicalError { streamed, error } => MessageRecord {
                info: MessageInfo {
                    error: Some(error.clone()),
                },
                parts: streamed
                    .iter()
                    .map(|t| MessagePart {
                        id: "p0".to_string(),
                        text: t.clone(),
                    })
                    .collect(),
            },
            // StreamOnly, StreamError, Silent: canonical comes back empty.
            _ => MessageRecord::default(),
        };
        self.canonical.lock().unwrap().insert(
            (session_id.to_string(), message_id.to_string()),
            canonical,
        );

        self.emit_stream(session_id, message_id, &reply);
        Ok(())
    }

    fn events(&self) -> EventStream {
        let rx = self.events_tx.subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() });
        Box::pin(stream)
    }

    async fn get_message(&self, session_id: &str, message_id: &str) -> Result<MessageRecord> {
        self.canonical
            .lock()
            .unwrap()
            .get(&(session_id.to_string(), message_id.to_string()))
            .cloned()
            .ok_or_else(|| AgentError::Transport("unknown message".to_string()))
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        self.aborted.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issues_distinct_session_ids() {
        let mock = MockAgentRuntime::new();
        let a = mock.create_session("a").await.unwrap();
        let b = mock.create_session("b").await.unwrap();
        assert_ne!(a, b);
        assert!(mock.get_session(&a).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_and_stale_ids_are_rejected() {
        let mock = MockAgentRuntime::new();
        assert!(matches!(
            mock.get_session("never-issued").await,
            Err(AgentError::StaleSession { .. })
        ));

        let id = mock.create_session("a").await.unwrap();
        mock.mark_stale(&id);
        assert!(mock.get_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn scripted_text_reaches_stream_and_canonical() {
        let mock = MockAgentRuntime::new();
        mock.script(ScriptedReply::Text("hello".to_string()));
        let ses = mock.create_session("a").await.unwrap();

        let mut events = mock.events();
        mock.prompt_async(&ses, "m1", "hi").await.unwrap();

        let mut saw_part = false;
        while let Some(event) = events.next().await {
            match event {
                AgentEvent::PartUpdated { delta, .. } => {
                    assert_eq!(delta.as_deref(), Some("hello"));
                    saw_part = true;
                }
                AgentEvent::SessionIdle { .. } => break,
                _ => {}
            }
        }
        assert!(saw_part);
        assert_eq!(mock.get_message(&ses, "m1").await.unwrap().text(), "hello");
    }

    #[tokio::test]
    async fn prompt_failure_records_nothing() {
        let mock = MockAgentRuntime::new();
        mock.script(ScriptedReply::PromptFailure("down".to_string()));
        let ses = mock.create_session("a").await.unwrap();
        assert!(mock.prompt_async(&ses, "m1", "hi").await.is_err());
        assert!(mock.prompts().is_empty());
    }
}
