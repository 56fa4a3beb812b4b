//! The runPrompt protocol: subscribe, submit, accumulate, finalize.
//!
//! The stream is treated as a hint and the canonical message as the
//! truth: whatever the stream accumulated, the message is re-fetched
//! after the stream settles and the canonical text wins when non-empty.
//! This guards against out-of-order and partially delivered streams.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use pocketbrain_agent::{AgentEvent, AgentRuntime, MessageRecord};

/// Outcome of one prompt run.
///
/// `text` and `error` are not exclusive: a message can stream text and
/// *then* be marked failed by the canonical record. The caller delivers
/// the text (it reached the stream, it is user-visible) and still
/// treats the run as failed.
#[derive(Debug, Clone, Default)]
pub struct PromptOutcome {
    pub text: Option<String>,
    pub error: Option<String>,
}

impl PromptOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            text: None,
            error: Some(error.into()),
        }
    }
}

pub struct PromptTimeouts {
    pub stream: Duration,
    pub finalize: Duration,
}

/// Run one prompt on an existing session and collect its reply.
pub async fn run_prompt(
    runtime: &Arc<dyn AgentRuntime>,
    session_id: &str,
    text: &str,
    timeouts: &PromptTimeouts,
    cancel: &CancellationToken,
) -> PromptOutcome {
    let message_id = Uuid::new_v4().to_string();

    // Subscribe before submitting so no event can be missed.
    let mut events = runtime.events();

    if let Err(e) = runtime.prompt_async(session_id, &message_id, text).await {
        return PromptOutcome::failed(format!("prompt submit failed: {e}"));
    }

    // --- stream accumulation ----------------------------------------------

    // Parts keyed by part id, in first-seen order.
    let mut parts: Vec<(String, String)> = Vec::new();
    let mut saw_target = false;
    let mut stream_error: Option<String> = None;
    let mut stream_timed_out = false;

    let deadline = tokio::time::sleep(timeouts.stream);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            // Checked first so a cancelled parent always wins over a
            // simultaneously ready event.
            biased;
            _ = cancel.cancelled() => {
                return PromptOutcome::failed("prompt cancelled");
            }
            _ = &mut deadline => {
                stream_timed_out = true;
                break;
            }
            event = events.next() => {
                let Some(event) = event else {
                    if !saw_target {
                        stream_error
                            .get_or_insert_with(|| "stream ended without target message".to_string());
                    }
                    break;
                };
                match event {
                    AgentEvent::PartUpdated {
                        session_id: sid,
                        message_id: mid,
                        part_id,
                        text,
                        delta,
                    } if sid == session_id && mid == message_id => {
                        accumulate_part(&mut parts, &part_id, text, delta);
                    }
                    AgentEvent::MessageUpdated {
                        session_id: sid,
                        message_id: mid,
                        error,
                    } if sid == session_id && mid == message_id => {
                        saw_target = true;
                        if let Some(error) = error {
                            stream_error = Some(error);
                        }
                    }
                    AgentEvent::SessionIdle { session_id: sid }
                        if sid == session_id && saw_target =>
                    {
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let streamed: String = parts.iter().map(|(_, text)| text.as_str()).collect();

    // --- canonical finalization -------------------------------------------

    // Required even when the stream looked clean.
    let canonical = fetch_canonical(runtime, session_id, &message_id, timeouts.finalize, cancel)
        .await;

    if let Some(record) = &canonical {
        if let Some(error) = &record.info.error {
            // Failed after (possibly) streaming. Whatever reached the
            // stream is user-visible, so hand it to the caller alongside
            // the failure.
            let text = if streamed.is_empty() {
                None
            } else {
                Some(streamed)
            };
            return PromptOutcome {
                text,
                error: Some(error.clone()),
            };
        }
    }

    if let Some(error) = stream_error {
        let error = if stream_timed_out {
            format!("{error} (stream timeout)")
        } else {
            error
        };
        return PromptOutcome::failed(error);
    }

    let canonical_text = canonical.map(|r| r.text()).unwrap_or_default();
    let final_text = if canonical_text.is_empty() {
        streamed
    } else {
        canonical_text
    };

    if final_text.is_empty() && stream_timed_out {
        return PromptOutcome::failed("stream timeout");
    }

    PromptOutcome {
        text: if final_text.is_empty() {
            None
        } else {
            Some(final_text)
        },
        error: None,
    }
}

fn accumulate_part(
    parts: &mut Vec<(String, String)>,
    part_id: &str,
    text: Option<String>,
    delta: Option<String>,
) {
    match parts.iter_mut().find(|(id, _)| id == part_id) {
        Some((_, acc)) => {
            // Prefer delta-append; a full text replaces the part so far.
            if let Some(delta) = delta {
                acc.push_str(&delta);
            } else if let Some(text) = text {
                *acc = text;
            }
        }
        None => {
            let initial = delta.or(text).unwrap_or_default();
            parts.push((part_id.to_string(), initial));
        }
    }
}

async fn fetch_canonical(
    runtime: &Arc<dyn AgentRuntime>,
    session_id: &str,
    message_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<MessageRecord> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        fetched = tokio::time::timeout(timeout, runtime.get_message(session_id, message_id)) => {
            match fetched {
                Ok(Ok(record)) => Some(record),
                Ok(Err(e)) => {
                    warn!(session = %session_id, "canonical fetch failed: {e}");
                    None
                }
                Err(_) => {
                    debug!(session = %session_id, "canonical fetch timed out");
                    None
                }
            }
        }
    }
}
