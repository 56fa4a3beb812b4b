use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use pocketbrain_store::Store;

use crate::{channel::Channel, error::ChannelError};

/// Minimum delay between outbox retries for one entry (seconds).
const BACKOFF_BASE_SECS: i64 = 5;
/// Maximum delay between outbox retries for one entry (seconds).
const BACKOFF_MAX_SECS: i64 = 300;
/// Attempts after which an outbox entry is dropped with an error log.
const MAX_ATTEMPTS: u32 = 10;
/// Outbox drain cadence (seconds).
const PUMP_INTERVAL_SECS: u64 = 5;

/// Routes outbound text to whichever registered adapter owns the jid.
///
/// A failed send is parked in the store outbox instead of being lost;
/// [`ChannelRouter::run_outbox_pump`] retries parked entries with
/// per-entry exponential backoff until delivery or [`MAX_ATTEMPTS`].
pub struct ChannelRouter {
    adapters: Vec<Arc<dyn Channel>>,
    store: Arc<Store>,
}

impl ChannelRouter {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            adapters: Vec::new(),
            store,
        }
    }

    /// Register a channel adapter.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        info!(channel = %channel.name(), "registering channel adapter");
        self.adapters.push(channel);
    }

    /// Connect all registered adapters. Failures are logged, not fatal —
    /// a dead adapter's traffic accumulates in the outbox.
    pub async fn connect_all(&self) {
        for adapter in &self.adapters {
            if let Err(e) = adapter.connect().await {
                error!(channel = %adapter.name(), error = %e, "channel connect failed");
            }
        }
    }

    /// Disconnect all registered adapters.
    pub async fn disconnect_all(&self) {
        for adapter in &self.adapters {
            if let Err(e) = adapter.disconnect().await {
                warn!(channel = %adapter.name(), error = %e, "channel disconnect failed");
            }
        }
    }

    fn adapter_for(&self, jid: &str) -> Option<&Arc<dyn Channel>> {
        self.adapters.iter().find(|a| a.owns(jid))
    }

    /// Deliver text to the adapter that owns `jid`.
    ///
    /// On send failure the message is enqueued in the outbox and the
    /// call reports success to the caller — delivery becomes the pump's
    /// problem. Only a jid no adapter claims is an error.
    pub async fn send(&self, jid: &str, text: &str) -> Result<(), ChannelError> {
        let Some(adapter) = self.adapter_for(jid) else {
            return Err(ChannelError::NoRoute {
                jid: jid.to_string(),
            });
        };
        if let Err(e) = adapter.send(jid, text).await {
            warn!(channel = %adapter.name(), chat = %jid, error = %e, "send failed, parking in outbox");
            self.store
                .outbox_enqueue(adapter.name(), jid, text)
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Best-effort typing indicator for the owning adapter.
    pub async fn set_typing(&self, jid: &str, typing: bool) {
        if let Some(adapter) = self.adapter_for(jid) {
            let _ = adapter.set_typing(jid, typing).await;
        }
    }

    /// Drain loop for parked outbound messages. Runs until `shutdown`
    /// broadcasts `true`.
    pub async fn run_outbox_pump(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(PUMP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.drain_outbox_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox pump shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the outbox of every adapter.
    pub async fn drain_outbox_once(&self) {
        let now = Utc::now();
        for adapter in &self.adapters {
            let pending = match self.store.outbox_pending(adapter.name(), &now.to_rfc3339()) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(channel = %adapter.name(), "outbox query failed: {e}");
                    continue;
                }
            };
            for entry in pending {
                match adapter.send(&entry.recipient, &entry.text).await {
                    Ok(()) => {
                        if let Err(e) = self.store.outbox_ack(entry.id) {
                            error!(id = entry.id, "outbox ack failed: {e}");
                        }
                    }
                    Err(e) => {
                        let attempts = entry.attempts + 1;
                        if attempts >= MAX_ATTEMPTS {
                            error!(
                                id = entry.id,
                                chat = %entry.recipient,
                                attempts,
                                "outbox entry exhausted retries, dropping: {e}"
                            );
                            let _ = self.store.outbox_ack(entry.id);
                            continue;
                        }
                        let delay = (BACKOFF_BASE_SECS << (attempts - 1).min(16))
                            .min(BACKOFF_MAX_SECS);
                        let next_retry = (now + Duration::seconds(delay)).to_rfc3339();
                        warn!(
                            id = entry.id,
                            chat = %entry.recipient,
                            attempts,
                            retry_after_secs = delay,
                            "outbox send failed, backing off: {e}"
                        );
                        if let Err(e) =
                            self.store.outbox_mark_retry(entry.id, attempts, &next_retry)
                        {
                            error!(id = entry.id, "outbox retry update failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChannel;

    fn router_with_mock(fail_sends: bool) -> (Arc<ChannelRouter>, Arc<MockChannel>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mock = Arc::new(MockChannel::new("mock", "@mock"));
        if fail_sends {
            mock.fail_sends(true);
        }
        let mut router = ChannelRouter::new(store);
        router.register(mock.clone());
        (Arc::new(router), mock)
    }

    #[tokio::test]
    async fn routes_by_ownership() {
        let (router, mock) = router_with_mock(false);
        router.send("a@mock", "hi").await.unwrap();
        assert_eq!(mock.sent(), vec![("a@mock".to_string(), "hi".to_string())]);

        let err = router.send("a@elsewhere", "hi").await;
        assert!(matches!(err, Err(ChannelError::NoRoute { .. })));
    }

    #[tokio::test]
    async fn failed_send_parks_in_outbox_and_pump_delivers() {
        let (router, mock) = router_with_mock(true);
        router.send("a@mock", "later").await.unwrap();
        assert!(mock.sent().is_empty());

        mock.fail_sends(false);
        router.drain_outbox_once().await;
        assert_eq!(
            mock.sent(),
            vec![("a@mock".to_string(), "later".to_string())]
        );
    }

    #[tokio::test]
    async fn pump_backs_off_failed_entries() {
        let (router, mock) = router_with_mock(true);
        router.send("a@mock", "later").await.unwrap();

        // Still failing: the entry is rescheduled into the future and a
        // second immediate pass must not retry it.
        router.drain_outbox_once().await;
        router.drain_outbox_once().await;
        assert_eq!(mock.send_attempts(), 2); // initial + first pump pass
    }
}
