//! HTTP/SSE adapter for an agent server exposing the runtime contract
//! over REST plus a server-sent-event stream at `/event`.

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, MessageRecord};
use crate::runtime::{AgentRuntime, EventStream};

/// Delay between SSE reconnect attempts.
const RECONNECT_DELAY_SECS: u64 = 5;
/// Broadcast buffer: slow subscribers lose oldest events past this.
const EVENT_BUFFER: usize = 1024;

/// [`AgentRuntime`] backed by an HTTP agent server.
///
/// A single background task holds the SSE connection and fans events
/// out through a broadcast channel; every [`AgentRuntime::events`]
/// call is an independent subscription.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    base_url: String,
    events_tx: broadcast::Sender<AgentEvent>,
}

impl HttpAgentRuntime {
    /// Build the client and start the SSE reader task.
    ///
    /// The reader reconnects forever with a fixed delay; a dead agent
    /// server degrades into prompt timeouts rather than a crash.
    pub fn connect(base_url: &str) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let runtime = Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            events_tx: events_tx.clone(),
        };

        let client = runtime.client.clone();
        let url = format!("{}/event", runtime.base_url);
        tokio::spawn(async move {
            loop {
                match client.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        read_sse(resp, &events_tx).await;
                        warn!("agent event stream ended, reconnecting");
                    }
                    Ok(resp) => {
                        warn!(status = %resp.status(), "agent event stream rejected");
                    }
                    Err(e) => {
                        warn!("agent event stream connect failed: {e}");
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        });

        runtime
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn create_session(&self, title: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(default)]
            id: Option<String>,
        }

        let resp = self
            .client
            .post(self.url("/session"))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?
            .error_for_status()?;
        let created: Created = resp.json().await?;
        created.id.ok_or(AgentError::MissingSessionId)
    }

    async fn get_session(&self, session_id: &str) -> Result<()> {
        let resp = self
            .client
            .get(self.url(&format!("/session/{session_id}")))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AgentError::StaleSession {
                id: session_id.to_string(),
            });
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.client
            .delete(self.url(&format!("/session/{session_id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn prompt_async(&self, session_id: &str, message_id: &str, text: &str) -> Result<()> {
        self.client
            .post(self.url(&format!("/session/{session_id}/prompt")))
            .json(&serde_json::json!({ "message_id": message_id, "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn events(&self) -> EventStream {
        let rx = self.events_tx.subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() });
        Box::pin(stream)
    }

    async fn get_message(&self, session_id: &str, message_id: &str) -> Result<MessageRecord> {
        let resp = self
            .client
            .get(self.url(&format!("/session/{session_id}/message/{message_id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        self.client
            .post(self.url(&format!("/session/{session_id}/abort")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Consume an SSE response body until it ends, broadcasting every
/// decoded event. Lines arrive split arbitrarily across chunks, so an
/// incomplete trailing line is buffered between reads.
async fn read_sse(resp: reqwest::Response, tx: &broadcast::Sender<AgentEvent>) {
    let mut byte_stream = resp.bytes_stream();
    let mut line_buf = String::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!("agent event stream read failed: {e}");
                return;
            }
        };
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<AgentEvent>(data) {
                Ok(event) => {
                    // No receivers is fine — nothing is prompting right now.
                    let _ = tx.send(event);
                }
                Err(e) => debug!("unrecognised agent event: {e}"),
            }
        }

        line_buf = remainder;
    }
}
