//! In-tree development adapter: records outbound sends, injects
//! inbound messages, and can be told to fail deliveries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use pocketbrain_core::types::ChatMessage;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::events::{ChannelEvent, ChannelEventSender};

pub struct MockChannel {
    name: String,
    /// Jids ending with this suffix belong to the mock.
    suffix: String,
    connected: AtomicBool,
    failing: AtomicBool,
    attempts: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
    events_tx: Mutex<Option<ChannelEventSender>>,
}

impl MockChannel {
    pub fn new(name: &str, suffix: &str) -> Self {
        Self {
            name: name.to_string(),
            suffix: suffix.to_string(),
            connected: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            events_tx: Mutex::new(None),
        }
    }

    /// Wire the adapter to the core's inbound event queue.
    pub fn attach_events(&self, tx: ChannelEventSender) {
        *self.events_tx.lock().unwrap() = Some(tx);
    }

    /// Toggle send failure injection.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything successfully delivered, as `(jid, text)` pairs.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Total send calls, delivered or not.
    pub fn send_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of delivered messages for one jid.
    pub fn sent_to(&self, jid: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(j, _)| j == jid)
            .count()
    }

    /// Push an inbound message into the core, as the transport would.
    pub async fn inject_message(&self, message: ChatMessage) {
        let tx = self.events_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(ChannelEvent::Inbound { message }).await;
        }
    }

    /// Push opportunistic chat metadata into the core.
    pub async fn inject_metadata(&self, chat_jid: &str, timestamp: &str, name: Option<&str>) {
        let tx = self.events_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(ChannelEvent::Metadata {
                    chat_jid: chat_jid.to_string(),
                    timestamp: timestamp.to_string(),
                    name: name.map(String::from),
                    is_group: None,
                })
                .await;
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn owns(&self, jid: &str) -> bool {
        jid.ends_with(&self.suffix)
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, jid: &str, text: &str) -> Result<(), ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("mock failure injected".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((jid.to_string(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ownership_is_by_suffix() {
        let mock = MockChannel::new("mock", "@mock");
        assert!(mock.owns("group-1@mock"));
        assert!(!mock.owns("group-1@whatsapp"));
    }

    #[tokio::test]
    async fn failure_injection_blocks_delivery() {
        let mock = MockChannel::new("mock", "@mock");
        mock.fail_sends(true);
        assert!(mock.send("a@mock", "x").await.is_err());
        assert!(mock.sent().is_empty());
        assert_eq!(mock.send_attempts(), 1);
    }
}
