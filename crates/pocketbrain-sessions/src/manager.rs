use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pocketbrain_agent::AgentRuntime;

use crate::context::{compose_first_prompt, compose_follow_up, context_prefix};
use crate::error::{Result, SessionError};
use crate::prompt::{run_prompt, PromptTimeouts};
use crate::types::{OutputSink, SessionInput, SessionOutput, SessionTimeouts};

/// In-memory counterpart of an open session.
struct ActiveSession {
    session_id: String,
    /// Immutable identity block, re-prepended on every follow-up.
    context_prefix: String,
    /// True while a prompt is in flight. The map entry's lock holder
    /// sets it before issuing a prompt and resets it afterwards.
    busy: bool,
    on_output: OutputSink,
    /// Resolves the parked `run_session` future on abort/shutdown.
    end_tx: Option<oneshot::Sender<()>>,
    cancel: CancellationToken,
}

/// Owns every in-flight session. At most one [`ActiveSession`] per
/// registry key, and — because callers hold per-chat exclusivity — at
/// most one in-flight prompt per session at any moment.
///
/// The map sits behind its own `Arc` so follow-up prompts, which run on
/// spawned tasks, can clear the busy flag without the manager itself
/// being wrapped.
pub struct SessionManager {
    runtime: Arc<dyn AgentRuntime>,
    active: Arc<DashMap<String, ActiveSession>>,
    timeouts: SessionTimeouts,
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn AgentRuntime>, timeouts: SessionTimeouts) -> Self {
        Self {
            runtime,
            active: Arc::new(DashMap::new()),
            timeouts,
        }
    }

    /// Whether the key has an open session (busy or not).
    pub fn has_active(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    /// Number of open sessions, for observability.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Open (or resume) a session, run the first prompt, then park
    /// until the session is aborted.
    ///
    /// Emits through `on_output`: the reply text (if any), then a
    /// session-update marker carrying the resolved session id so the
    /// caller can persist the binding. Returns `Err` when the first
    /// prompt fails — the session is closed and the caller decides
    /// whether to retry.
    pub async fn run_session(&self, input: SessionInput, on_output: OutputSink) -> Result<()> {
        let key = input.registry_key.clone();
        if self.active.contains_key(&key) {
            return Err(SessionError::AlreadyActive { key });
        }

        let (session_id, is_new) = self.resolve_session(&input).await?;
        info!(key = %key, session = %session_id, is_new, "session opened");

        let prefix = context_prefix(&input.chat);
        let cancel = CancellationToken::new();
        let (end_tx, end_rx) = oneshot::channel();
        self.active.insert(
            key.clone(),
            ActiveSession {
                session_id: session_id.clone(),
                context_prefix: prefix.clone(),
                busy: true,
                on_output: Arc::clone(&on_output),
                end_tx: Some(end_tx),
                cancel: cancel.clone(),
            },
        );

        // Instructions are a session-creation concern: resumed sessions
        // have already seen them.
        let instructions = if is_new {
            input.instructions.as_deref()
        } else {
            None
        };
        let first = compose_first_prompt(
            &prefix,
            input.is_scheduled_task,
            instructions,
            &input.prompt,
        );

        let outcome = run_prompt(
            &self.runtime,
            &session_id,
            &first,
            &self.prompt_timeouts(),
            &cancel,
        )
        .await;

        if let Some(mut entry) = self.active.get_mut(&key) {
            entry.busy = false;
        }

        if let Some(text) = &outcome.text {
            (on_output)(SessionOutput::Text(text.clone()));
        }
        (on_output)(SessionOutput::SessionUpdate {
            session_id: session_id.clone(),
        });

        if let Some(error) = outcome.error {
            self.close(&key);
            return Err(SessionError::Prompt(error));
        }

        // Parked until abort_session / abort_if_idle / shutdown. The
        // sender being dropped counts as an end signal too.
        let _ = end_rx.await;
        info!(key = %key, session = %session_id, "session ended");
        Ok(())
    }

    /// Route a follow-up into the key's open session.
    ///
    /// Returns `false` when there is no open session or a prompt is in
    /// flight — acceptance is what callers use to gate cursor
    /// advancement. The prompt itself runs on a spawned task and emits
    /// through the session's registered sink.
    pub fn send_follow_up(&self, key: &str, text: &str) -> bool {
        let (session_id, composed, sink, cancel) = {
            let Some(mut entry) = self.active.get_mut(key) else {
                return false;
            };
            if entry.busy {
                return false;
            }
            entry.busy = true;
            (
                entry.session_id.clone(),
                compose_follow_up(&entry.context_prefix, text),
                Arc::clone(&entry.on_output),
                entry.cancel.clone(),
            )
        };

        let runtime = Arc::clone(&self.runtime);
        let active = Arc::clone(&self.active);
        let timeouts = self.prompt_timeouts();
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = run_prompt(&runtime, &session_id, &composed, &timeouts, &cancel).await;
            if let Some(text) = outcome.text {
                (sink)(SessionOutput::Text(text));
            }
            if let Some(error) = outcome.error {
                warn!(key = %key, session = %session_id, "follow-up failed: {error}");
            }
            if let Some(mut entry) = active.get_mut(&key) {
                entry.busy = false;
            }
        });
        true
    }

    /// Abort the key's session unconditionally. Idempotent — aborting a
    /// key with no open session is a no-op.
    pub fn abort_session(&self, key: &str) {
        let Some((_, mut session)) = self.active.remove(key) else {
            return;
        };
        session.cancel.cancel();
        if session.busy {
            // Best-effort interrupt of the in-flight prompt.
            let runtime = Arc::clone(&self.runtime);
            let session_id = session.session_id.clone();
            tokio::spawn(async move {
                if let Err(e) = runtime.abort(&session_id).await {
                    warn!(session = %session_id, "runtime abort failed: {e}");
                }
            });
        }
        if let Some(tx) = session.end_tx.take() {
            let _ = tx.send(());
        }
        info!(key = %key, "session aborted");
    }

    /// Abort the key's session only if no prompt is in flight. Used by
    /// idle timers: a busy session is by definition not idle.
    pub fn abort_if_idle(&self, key: &str) -> bool {
        let Some((_, mut session)) = self.active.remove_if(key, |_, s| !s.busy) else {
            return false;
        };
        session.cancel.cancel();
        if let Some(tx) = session.end_tx.take() {
            let _ = tx.send(());
        }
        info!(key = %key, "idle session aborted");
        true
    }

    /// Abort everything. Called on shutdown.
    pub fn abort_all(&self) {
        let keys: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.abort_session(&key);
        }
    }

    fn prompt_timeouts(&self) -> PromptTimeouts {
        PromptTimeouts {
            stream: self.timeouts.stream,
            finalize: self.timeouts.finalize,
        }
    }

    /// Resolve the session id to prompt against.
    ///
    /// A persisted id is probed with a bounded `get_session`; failure or
    /// timeout marks it stale, triggers a fire-and-forget delete, and
    /// falls through to creation.
    async fn resolve_session(&self, input: &SessionInput) -> Result<(String, bool)> {
        if let Some(id) = &input.session_id {
            let probe =
                tokio::time::timeout(self.timeouts.init, self.runtime.get_session(id)).await;
            match probe {
                Ok(Ok(())) => return Ok((id.clone(), false)),
                _ => {
                    warn!(session = %id, "persisted session is stale, recreating");
                    let runtime = Arc::clone(&self.runtime);
                    let stale_id = id.clone();
                    tokio::spawn(async move {
                        let _ = runtime.delete_session(&stale_id).await;
                    });
                }
            }
        }

        let created = tokio::time::timeout(
            self.timeouts.init,
            self.runtime.create_session(&input.chat.name),
        )
        .await;
        match created {
            Ok(Ok(id)) if !id.is_empty() => Ok((id, true)),
            _ => Err(SessionError::NoSessionId),
        }
    }

    fn close(&self, key: &str) {
        if let Some((_, mut session)) = self.active.remove(key) {
            session.cancel.cancel();
            if let Some(tx) = session.end_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use pocketbrain_agent::mock::{MockAgentRuntime, ScriptedReply};

    use crate::types::SessionChat;

    fn manager(mock: &Arc<MockAgentRuntime>) -> Arc<SessionManager> {
        let runtime: Arc<dyn AgentRuntime> = Arc::clone(mock) as Arc<dyn AgentRuntime>;
        Arc::new(SessionManager::new(runtime, SessionTimeouts::default()))
    }

    fn input(session_id: Option<&str>) -> SessionInput {
        SessionInput {
            registry_key: "123@g.us".to_string(),
            chat: SessionChat {
                jid: "123@g.us".to_string(),
                folder: "family".to_string(),
                name: "Family".to_string(),
                is_main: false,
            },
            session_id: session_id.map(String::from),
            prompt: "hello".to_string(),
            is_scheduled_task: false,
            instructions: None,
        }
    }

    fn sink() -> (OutputSink, Arc<Mutex<Vec<SessionOutput>>>) {
        let outputs: Arc<Mutex<Vec<SessionOutput>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&outputs);
        let sink: OutputSink = Arc::new(move |out| seen.lock().unwrap().push(out));
        (sink, outputs)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn session_updates(outputs: &Mutex<Vec<SessionOutput>>) -> Vec<String> {
        outputs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| match o {
                SessionOutput::SessionUpdate { session_id } => Some(session_id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn first_prompt_emits_text_then_session_update() {
        let mock = Arc::new(MockAgentRuntime::new());
        mock.script(ScriptedReply::Text("hi there".to_string()));
        let manager = manager(&mock);
        let (sink, outputs) = sink();

        let m = Arc::clone(&manager);
        let handle = tokio::spawn(async move { m.run_session(input(None), sink).await });

        wait_until(|| !session_updates(&outputs).is_empty()).await;
        {
            let outputs = outputs.lock().unwrap();
            assert!(matches!(&outputs[0], SessionOutput::Text(t) if t == "hi there"));
            assert!(matches!(&outputs[1], SessionOutput::SessionUpdate { .. }));
        }

        assert!(manager.has_active("123@g.us"));
        manager.abort_session("123@g.us");
        assert!(handle.await.unwrap().is_ok());
        assert!(!manager.has_active("123@g.us"));
    }

    #[tokio::test]
    async fn stale_persisted_session_is_deleted_and_replaced() {
        // Persisted id "X" was never issued by this runtime instance, so
        // the probe fails; the manager must delete it, create a fresh
        // session, and prompt against the fresh id.
        let mock = Arc::new(MockAgentRuntime::new());
        mock.script(ScriptedReply::Text("recovered".to_string()));
        let manager = manager(&mock);
        let (sink, outputs) = sink();

        let m = Arc::clone(&manager);
        let handle = tokio::spawn(async move { m.run_session(input(Some("X")), sink).await });

        wait_until(|| !session_updates(&outputs).is_empty()).await;
        let new_id = session_updates(&outputs)[0].clone();
        assert_ne!(new_id, "X");
        assert!(mock.deleted().contains(&"X".to_string()));
        assert_eq!(mock.prompts()[0].session_id, new_id);

        manager.abort_session("123@g.us");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn prompt_failure_closes_the_session_and_errors() {
        let mock = Arc::new(MockAgentRuntime::new());
        mock.script(ScriptedReply::PromptFailure("down".to_string()));
        let manager = manager(&mock);
        let (sink, outputs) = sink();

        let result = manager.run_session(input(None), sink).await;
        assert!(matches!(result, Err(SessionError::Prompt(_))));
        assert!(!manager.has_active("123@g.us"));
        // The session id is still reported so the caller can persist the
        // fresh binding for the retry.
        assert_eq!(session_updates(&outputs).len(), 1);
    }

    #[tokio::test]
    async fn second_run_for_same_key_is_rejected() {
        let mock = Arc::new(MockAgentRuntime::new());
        let manager = manager(&mock);
        let (sink, outputs) = sink();

        let m = Arc::clone(&manager);
        let s = Arc::clone(&sink);
        let handle = tokio::spawn(async move { m.run_session(input(None), s).await });
        wait_until(|| !session_updates(&outputs).is_empty()).await;

        let result = manager.run_session(input(None), sink).await;
        assert!(matches!(result, Err(SessionError::AlreadyActive { .. })));

        manager.abort_session("123@g.us");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn follow_up_rides_the_open_session() {
        let mock = Arc::new(MockAgentRuntime::new());
        mock.script(ScriptedReply::Text("first".to_string()));
        mock.script(ScriptedReply::Text("second".to_string()));
        let manager = manager(&mock);
        let (sink, outputs) = sink();

        let m = Arc::clone(&manager);
        let handle = tokio::spawn(async move { m.run_session(input(None), sink).await });
        wait_until(|| !session_updates(&outputs).is_empty()).await;

        assert!(manager.send_follow_up("123@g.us", "more"));
        wait_until(|| mock.prompts().len() == 2).await;

        let prompts = mock.prompts();
        assert_eq!(prompts[0].session_id, prompts[1].session_id);
        // The context prefix is re-injected on the follow-up.
        assert!(prompts[1].text.starts_with("<pocketbrain_context>"));
        assert!(prompts[1].text.ends_with("more"));

        wait_until(|| {
            outputs
                .lock()
                .unwrap()
                .iter()
                .any(|o| matches!(o, SessionOutput::Text(t) if t == "second"))
        })
        .await;

        manager.abort_session("123@g.us");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn follow_up_without_session_is_rejected() {
        let mock = Arc::new(MockAgentRuntime::new());
        let manager = manager(&mock);
        assert!(!manager.send_follow_up("123@g.us", "hello?"));
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let mock = Arc::new(MockAgentRuntime::new());
        let manager = manager(&mock);
        manager.abort_session("123@g.us");
        manager.abort_session("123@g.us");
        assert!(!manager.abort_if_idle("123@g.us"));
    }

    #[tokio::test]
    async fn abort_if_idle_closes_a_parked_session() {
        let mock = Arc::new(MockAgentRuntime::new());
        let manager = manager(&mock);
        let (sink, outputs) = sink();

        let m = Arc::clone(&manager);
        let handle = tokio::spawn(async move { m.run_session(input(None), sink).await });
        wait_until(|| !session_updates(&outputs).is_empty()).await;

        assert!(manager.abort_if_idle("123@g.us"));
        handle.await.unwrap().unwrap();
        assert!(!manager.has_active("123@g.us"));
    }
}
