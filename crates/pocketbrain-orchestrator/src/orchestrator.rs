use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use pocketbrain_channels::{ChannelEvent, ChannelRouter};
use pocketbrain_core::sanitize::strip_internal;
use pocketbrain_core::types::{Chat, ChatMessage};
use pocketbrain_queue::{BatchHandler, ChatQueue};
use pocketbrain_sessions::{
    IdleTimer, OutputSink, SessionChat, SessionInput, SessionManager, SessionOutput,
};
use pocketbrain_store::Store;

use crate::format::format_batch;

/// Resets the chat's agent session when sent as a bare message.
const NEW_SESSION_COMMAND: &str = "/new";
const NEW_SESSION_REPLY: &str = "Started a fresh session.";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tick_interval: Duration,
    pub idle_timeout: Duration,
    /// Directory of per-chat instruction files (`<folder>.md`), injected
    /// into brand-new sessions.
    pub instructions_dir: PathBuf,
}

/// Last-known liveness of a chat, tracked even before registration so
/// an admin can see which conversations exist.
#[derive(Debug, Clone)]
pub struct ChatLiveness {
    pub last_timestamp: String,
    pub name: Option<String>,
}

/// Owns the inbound loop: persists channel events, batches pending
/// messages per chat, routes them into live sessions or new queue
/// slots, and enforces the rollback-before-output cursor rule.
pub struct Orchestrator {
    store: Arc<Store>,
    queue: Arc<ChatQueue>,
    sessions: Arc<SessionManager>,
    router: Arc<ChannelRouter>,
    settings: OrchestratorSettings,
    liveness: Mutex<HashMap<String, ChatLiveness>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<ChatQueue>,
        sessions: Arc<SessionManager>,
        router: Arc<ChannelRouter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            queue,
            sessions,
            router,
            settings,
            liveness: Mutex::new(HashMap::new()),
        }
    }

    /// Main loop: drain channel events continuously, tick periodically.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ChannelEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("orchestrator started");
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    self.on_event(event);
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("orchestrator shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn on_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Inbound { message } => self.on_message(message),
            ChannelEvent::Metadata {
                chat_jid,
                timestamp,
                name,
                ..
            } => {
                self.liveness.lock().unwrap().insert(
                    chat_jid,
                    ChatLiveness {
                        last_timestamp: timestamp,
                        name,
                    },
                );
            }
        }
    }

    /// Persist an inbound message. Messages for unregistered chats are
    /// dropped silently — registration is the admission control.
    pub fn on_message(&self, msg: ChatMessage) {
        self.liveness.lock().unwrap().insert(
            msg.chat_jid.clone(),
            ChatLiveness {
                last_timestamp: msg.timestamp.clone(),
                name: None,
            },
        );
        match self.store.get_chat_by_jid(&msg.chat_jid) {
            Ok(Some(_)) => {
                if let Err(e) = self.store.record_message(&msg) {
                    error!(chat = %msg.chat_jid, "message persist failed: {e}");
                }
            }
            Ok(None) => debug!(chat = %msg.chat_jid, "dropping message for unregistered chat"),
            Err(e) => error!(chat = %msg.chat_jid, "chat lookup failed: {e}"),
        }
    }

    /// Chats observed via metadata or messages, registered or not.
    pub fn known_chats(&self) -> Vec<(String, ChatLiveness)> {
        self.liveness
            .lock()
            .unwrap()
            .iter()
            .map(|(jid, liveness)| (jid.clone(), liveness.clone()))
            .collect()
    }

    /// One inbound pass: advance the seen cursor over everything new,
    /// then dispatch each touched chat's pending window.
    pub async fn tick(&self) {
        let seen = match self.store.seen_cursor() {
            Ok(seen) => seen,
            Err(e) => {
                error!("seen cursor read failed: {e}");
                return;
            }
        };
        let fresh = match self.store.messages_after_global(&seen) {
            Ok(fresh) => fresh,
            Err(e) => {
                error!("global message query failed: {e}");
                return;
            }
        };
        let Some(last) = fresh.last() else {
            return;
        };
        // Seen advances immediately: it only records observation, never
        // processing progress.
        if let Err(e) = self.store.set_seen_cursor(&last.timestamp) {
            error!("seen cursor write failed: {e}");
            return;
        }

        let touched: BTreeSet<String> = fresh.iter().map(|m| m.chat_jid.clone()).collect();
        for jid in touched {
            let chat = match self.store.get_chat_by_jid(&jid) {
                Ok(Some(chat)) => chat,
                Ok(None) => continue,
                Err(e) => {
                    error!(chat = %jid, "chat lookup failed: {e}");
                    continue;
                }
            };
            self.dispatch_pending(&chat).await;
        }
    }

    /// Route one chat's pending window: follow-up into a live session
    /// when possible (cursor advances on acceptance), otherwise claim a
    /// queue slot for a new batch.
    async fn dispatch_pending(&self, chat: &Chat) {
        let processed = match self.store.processed_cursor(&chat.jid) {
            Ok(processed) => processed,
            Err(e) => {
                error!(chat = %chat.jid, "processed cursor read failed: {e}");
                return;
            }
        };
        let pending = match self.store.messages_after(&chat.jid, &processed) {
            Ok(pending) => pending,
            Err(e) => {
                error!(chat = %chat.jid, "pending query failed: {e}");
                return;
            }
        };
        let actionable: Vec<ChatMessage> = pending
            .iter()
            .filter(|m| !m.is_bot_message)
            .cloned()
            .collect();
        let Some(last) = pending.last() else {
            return;
        };

        if actionable.is_empty() {
            // Pure echo window (our own deliveries): nothing to prompt,
            // just advance past it.
            let _ = self.store.set_processed_cursor(&chat.jid, &last.timestamp);
            return;
        }

        // The reset command never reaches the agent.
        if let Some(cmd) = actionable
            .iter()
            .find(|m| m.content.trim() == NEW_SESSION_COMMAND)
        {
            self.reset_session(chat, &cmd.timestamp).await;
            return;
        }

        let prompt = format_batch(&actionable);
        if self.queue.route_followup(&chat.jid, &prompt) {
            debug!(chat = %chat.jid, count = actionable.len(), "routed into live session");
            if let Err(e) = self.store.set_processed_cursor(&chat.jid, &last.timestamp) {
                error!(chat = %chat.jid, "processed cursor write failed: {e}");
            }
        } else {
            self.queue.enqueue_new(&chat.jid);
        }
    }

    /// Handle `/new`: abort the live session, drop the persisted
    /// binding, advance the cursor past the command and confirm.
    /// Messages after the command stay pending for the fresh session.
    async fn reset_session(&self, chat: &Chat, command_ts: &str) {
        info!(chat = %chat.jid, "session reset requested");
        self.sessions.abort_session(&chat.jid);
        if let Err(e) = self.store.clear_session(&chat.folder) {
            error!(chat = %chat.jid, "session binding clear failed: {e}");
        }
        if let Err(e) = self.store.set_processed_cursor(&chat.jid, command_ts) {
            error!(chat = %chat.jid, "processed cursor write failed: {e}");
        }
        if let Err(e) = self.router.send(&chat.jid, NEW_SESSION_REPLY).await {
            error!(chat = %chat.jid, "reset confirmation failed: {e}");
        }
    }

    /// On boot: any registered chat with unprocessed backlog gets a
    /// fresh batch. Covers the crash-between-persist-and-process case.
    pub fn recover(&self) {
        let chats = match self.store.list_chats() {
            Ok(chats) => chats,
            Err(e) => {
                error!("chat listing failed during recovery: {e}");
                return;
            }
        };
        for chat in chats {
            let processed = self.store.processed_cursor(&chat.jid).unwrap_or_default();
            match self.store.messages_after(&chat.jid, &processed) {
                Ok(pending) if !pending.is_empty() => {
                    info!(chat = %chat.jid, backlog = pending.len(), "recovering unprocessed backlog");
                    self.queue.enqueue_new(&chat.jid);
                }
                Ok(_) => {}
                Err(e) => error!(chat = %chat.jid, "recovery query failed: {e}"),
            }
        }
    }

    fn load_instructions(&self, folder: &str) -> Option<String> {
        let path = self.settings.instructions_dir.join(format!("{folder}.md"));
        std::fs::read_to_string(path).ok()
    }
}

#[async_trait]
impl BatchHandler for Orchestrator {
    /// Run one message batch under the chat's queue slot.
    ///
    /// The processed cursor advances optimistically before the run; on
    /// failure it is rolled back only if nothing reached the user.
    /// Returning `false` asks the queue for a backoff retry.
    async fn process_batch(&self, chat_jid: &str) -> bool {
        let chat = match self.store.get_chat_by_jid(chat_jid) {
            Ok(Some(chat)) => chat,
            Ok(None) => return true, // unregistered since enqueue
            Err(e) => {
                error!(chat = %chat_jid, "chat lookup failed: {e}");
                return false;
            }
        };

        let previous = match self.store.processed_cursor(chat_jid) {
            Ok(previous) => previous,
            Err(e) => {
                error!(chat = %chat_jid, "processed cursor read failed: {e}");
                return false;
            }
        };
        let pending = match self.store.messages_after(chat_jid, &previous) {
            Ok(pending) => pending,
            Err(e) => {
                error!(chat = %chat_jid, "pending query failed: {e}");
                return false;
            }
        };
        let Some(last) = pending.last() else {
            return true;
        };
        let last_ts = last.timestamp.clone();
        let actionable: Vec<ChatMessage> = pending
            .iter()
            .filter(|m| !m.is_bot_message)
            .cloned()
            .collect();
        if actionable.is_empty() {
            let _ = self.store.set_processed_cursor(chat_jid, &last_ts);
            return true;
        }
        if let Some(cmd) = actionable
            .iter()
            .find(|m| m.content.trim() == NEW_SESSION_COMMAND)
        {
            // Can land here through recovery; handle it the same way.
            self.reset_session(&chat, &cmd.timestamp).await;
            return true;
        }

        // Optimistic advance, persisted before the run.
        if let Err(e) = self.store.set_processed_cursor(chat_jid, &last_ts) {
            error!(chat = %chat_jid, "processed cursor write failed: {e}");
            return false;
        }

        let output_sent = Arc::new(AtomicBool::new(false));
        let timer = Arc::new(IdleTimer::start(self.settings.idle_timeout, {
            let queue = Arc::clone(&self.queue);
            let jid = chat_jid.to_string();
            move || queue.request_idle_abort(&jid)
        }));

        let on_output: OutputSink = {
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            let router = Arc::clone(&self.router);
            let output_sent = Arc::clone(&output_sent);
            let timer = Arc::clone(&timer);
            let jid = chat.jid.clone();
            let folder = chat.folder.clone();
            Arc::new(move |output| match output {
                SessionOutput::Text(text) => {
                    let clean = strip_internal(&text);
                    if clean.is_empty() {
                        return;
                    }
                    output_sent.store(true, Ordering::SeqCst);
                    timer.touch();
                    let router = Arc::clone(&router);
                    let jid = jid.clone();
                    tokio::spawn(async move {
                        if let Err(e) = router.send(&jid, &clean).await {
                            error!(chat = %jid, "reply delivery failed: {e}");
                        }
                    });
                }
                SessionOutput::SessionUpdate { session_id } => {
                    if let Err(e) = store.set_session(&folder, &session_id) {
                        error!(chat = %jid, "session persist failed: {e}");
                    }
                    queue.register_session(&jid, &folder, &session_id);
                }
            })
        };

        let input = SessionInput {
            registry_key: chat.jid.clone(),
            chat: SessionChat {
                jid: chat.jid.clone(),
                folder: chat.folder.clone(),
                name: chat.name.clone(),
                is_main: chat.is_main,
            },
            session_id: self.store.get_session(&chat.folder).ok().flatten(),
            prompt: format_batch(&actionable),
            is_scheduled_task: false,
            instructions: self.load_instructions(&chat.folder),
        };

        let result = self.sessions.run_session(input, on_output).await;
        timer.stop();

        match result {
            Ok(()) => true,
            Err(e) => {
                if output_sent.load(Ordering::SeqCst) {
                    // Text already reached the user: keep the cursor, do
                    // not retry — a retry would duplicate the reply.
                    warn!(chat = %chat_jid, "batch failed after output, keeping cursor: {e}");
                    true
                } else {
                    warn!(chat = %chat_jid, "batch failed before output, rolling back: {e}");
                    if let Err(e) = self.store.set_processed_cursor(chat_jid, &previous) {
                        error!(chat = %chat_jid, "cursor rollback failed: {e}");
                    }
                    false
                }
            }
        }
    }
}
