use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use pocketbrain_sessions::SessionManager;

/// A boxed unit of scheduled-task work, run under the chat's slot.
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type TaskThunk = Box<dyn FnOnce() -> TaskFuture + Send>;

/// The queue's caller-provided batch executor. Returns whether the
/// batch succeeded; a `false` schedules a backoff retry.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn process_batch(&self, chat_jid: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_base_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 5,
            retry_base_ms: 5_000,
        }
    }
}

struct TaskJob {
    task_id: String,
    thunk: TaskThunk,
}

#[derive(Default)]
struct ChatState {
    /// The chat currently holds a slot.
    active: bool,
    /// Messages arrived while the slot was held; re-run a batch on release.
    pending_messages: bool,
    pending_tasks: VecDeque<TaskJob>,
    running_task_id: Option<String>,
    retry_count: u32,
    /// Session identity bound via `register_session`, for logs only —
    /// the SessionManager's map is the routing truth.
    #[allow(dead_code)]
    bound_session: Option<String>,
}

#[derive(Default)]
struct QueueState {
    chats: HashMap<String, ChatState>,
    active_count: usize,
    waiting: VecDeque<String>,
    shutting_down: bool,
}

/// What to start after a slot event, decided under the lock and
/// executed outside it.
enum Next {
    Task(String, TaskJob),
    Batch(String),
    Nothing,
}

/// Everything behind the queue's own `Arc`, so spawned slot tasks can
/// report back without the caller having to wrap [`ChatQueue`] itself.
struct Shared {
    inner: Mutex<QueueState>,
    settings: QueueSettings,
    sessions: Arc<SessionManager>,
    handler: OnceLock<Arc<dyn BatchHandler>>,
}

/// Per-chat serialization + global concurrency bound + retry + drain
/// prioritization.
///
/// All bookkeeping lives under one std mutex that is never held across
/// an await point; actual work runs on spawned tasks that report back
/// through [`release_slot`]. The handle is cheap to clone.
#[derive(Clone)]
pub struct ChatQueue {
    shared: Arc<Shared>,
}

impl ChatQueue {
    pub fn new(sessions: Arc<SessionManager>, settings: QueueSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(QueueState::default()),
                settings,
                sessions,
                handler: OnceLock::new(),
            }),
        }
    }

    /// Wire the batch executor. Must be called once before any
    /// `enqueue_new`; the orchestrator does this at composition time.
    pub fn set_batch_handler(&self, handler: Arc<dyn BatchHandler>) {
        if self.shared.handler.set(handler).is_err() {
            warn!("batch handler already set, ignoring");
        }
    }

    /// Schedule a message batch for the chat.
    ///
    /// If the chat already holds a slot the pending-messages flag is
    /// set; if the global ceiling is reached the chat joins the waiting
    /// FIFO; otherwise the batch starts immediately.
    pub fn enqueue_new(&self, chat_jid: &str) {
        enqueue_new(&self.shared, chat_jid);
    }

    /// Schedule a task under the chat's slot, deduplicating against an
    /// already-queued or currently-running job with the same id.
    pub fn enqueue_task(&self, chat_jid: &str, task_id: &str, thunk: TaskThunk) {
        enqueue_task(&self.shared, chat_jid, task_id, thunk);
    }

    /// Bind the chat's live session identity for follow-up routing logs.
    pub fn register_session(&self, chat_jid: &str, folder: &str, session_id: &str) {
        let mut q = self.shared.inner.lock().unwrap();
        let state = q.chats.entry(chat_jid.to_string()).or_default();
        state.bound_session = Some(session_id.to_string());
        debug!(chat = %chat_jid, %folder, session = %session_id, "session registered");
    }

    /// Route text into the chat's open, non-busy session. Returns
    /// whether the follow-up was accepted; acceptance gates cursor
    /// advancement at the caller.
    pub fn route_followup(&self, chat_jid: &str, text: &str) -> bool {
        self.shared.sessions.send_follow_up(chat_jid, text)
    }

    /// Abort the chat's session if no prompt is in flight.
    pub fn request_idle_abort(&self, chat_jid: &str) -> bool {
        self.shared.sessions.abort_if_idle(chat_jid)
    }

    /// Number of currently held slots.
    pub fn active_slots(&self) -> usize {
        self.shared.inner.lock().unwrap().active_count
    }

    /// Stop admitting work, abort open sessions so parked slots unwind,
    /// and wait up to `grace` for in-flight slots to drain.
    pub async fn shutdown(&self, grace: Duration) {
        {
            let mut q = self.shared.inner.lock().unwrap();
            q.shutting_down = true;
        }
        self.shared.sessions.abort_all();

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.active_slots() == 0 {
                info!("queue drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.active_slots(),
                    "shutdown grace expired with slots still active"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

// --- slot lifecycle --------------------------------------------------------

fn enqueue_new(shared: &Arc<Shared>, chat_jid: &str) {
    let start = {
        let mut q = shared.inner.lock().unwrap();
        if q.shutting_down {
            debug!(chat = %chat_jid, "queue shutting down, dropping enqueue");
            return;
        }
        let at_capacity = q.active_count >= shared.settings.max_concurrent;
        let state = q.chats.entry(chat_jid.to_string()).or_default();
        if state.active {
            state.pending_messages = true;
            false
        } else if at_capacity {
            state.pending_messages = true;
            if !q.waiting.iter().any(|j| j == chat_jid) {
                q.waiting.push_back(chat_jid.to_string());
            }
            false
        } else {
            state.active = true;
            q.active_count += 1;
            true
        }
    };
    if start {
        spawn_batch(shared, chat_jid.to_string());
    }
}

fn enqueue_task(shared: &Arc<Shared>, chat_jid: &str, task_id: &str, thunk: TaskThunk) {
    let job = TaskJob {
        task_id: task_id.to_string(),
        thunk,
    };
    let to_start = {
        let mut q = shared.inner.lock().unwrap();
        if q.shutting_down {
            debug!(task = %task_id, "queue shutting down, dropping task");
            return;
        }
        let at_capacity = q.active_count >= shared.settings.max_concurrent;
        let state = q.chats.entry(chat_jid.to_string()).or_default();
        if state.running_task_id.as_deref() == Some(task_id)
            || state.pending_tasks.iter().any(|t| t.task_id == task_id)
        {
            debug!(task = %task_id, "task already queued or running, deduped");
            return;
        }
        if state.active || at_capacity {
            state.pending_tasks.push_back(job);
            if !state.active && !q.waiting.iter().any(|j| j == chat_jid) {
                q.waiting.push_back(chat_jid.to_string());
            }
            None
        } else {
            state.active = true;
            state.running_task_id = Some(task_id.to_string());
            q.active_count += 1;
            Some(job)
        }
    };
    if let Some(job) = to_start {
        spawn_task(shared, chat_jid.to_string(), job);
    }
}

fn spawn_batch(shared: &Arc<Shared>, chat_jid: String) {
    let Some(handler) = shared.handler.get().cloned() else {
        error!("no batch handler wired, releasing slot");
        release_slot(shared, &chat_jid);
        return;
    };
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let ok = handler.process_batch(&chat_jid).await;
        after_batch(&shared, &chat_jid, ok);
        release_slot(&shared, &chat_jid);
    });
}

fn spawn_task(shared: &Arc<Shared>, chat_jid: String, job: TaskJob) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        (job.thunk)().await;
        {
            let mut q = shared.inner.lock().unwrap();
            if let Some(state) = q.chats.get_mut(&chat_jid) {
                state.running_task_id = None;
            }
        }
        release_slot(&shared, &chat_jid);
    });
}

/// Retry bookkeeping after a batch completes.
fn after_batch(shared: &Arc<Shared>, chat_jid: &str, ok: bool) {
    let retry_in = {
        let mut q = shared.inner.lock().unwrap();
        let state = q.chats.entry(chat_jid.to_string()).or_default();
        if ok {
            state.retry_count = 0;
            None
        } else {
            state.retry_count += 1;
            if state.retry_count > shared.settings.max_retries {
                warn!(chat = %chat_jid, "batch retries exhausted, waiting for new input");
                state.retry_count = 0;
                None
            } else {
                let delay =
                    shared.settings.retry_base_ms * (1u64 << (state.retry_count - 1).min(16));
                Some((state.retry_count, Duration::from_millis(delay)))
            }
        }
    };
    if let Some((attempt, delay)) = retry_in {
        info!(
            chat = %chat_jid,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling batch retry"
        );
        let shared = Arc::clone(shared);
        let chat_jid = chat_jid.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            enqueue_new(&shared, &chat_jid);
        });
    }
}

/// Free the chat's slot, draining pending work first: tasks before
/// messages (tasks are time-bound; messages re-trigger themselves),
/// then the waiting FIFO fills whatever capacity remains.
fn release_slot(shared: &Arc<Shared>, chat_jid: &str) {
    let (next, woken) = {
        let mut q = shared.inner.lock().unwrap();
        let shutting_down = q.shutting_down;
        let state = q.chats.entry(chat_jid.to_string()).or_default();

        let next = if shutting_down {
            state.pending_messages = false;
            state.active = false;
            q.active_count = q.active_count.saturating_sub(1);
            Next::Nothing
        } else if let Some(job) = state.pending_tasks.pop_front() {
            state.running_task_id = Some(job.task_id.clone());
            Next::Task(chat_jid.to_string(), job)
        } else if state.pending_messages {
            state.pending_messages = false;
            Next::Batch(chat_jid.to_string())
        } else {
            state.active = false;
            q.active_count = q.active_count.saturating_sub(1);
            Next::Nothing
        };

        let mut woken: Vec<Next> = Vec::new();
        if matches!(next, Next::Nothing) && !shutting_down {
            while q.active_count < shared.settings.max_concurrent {
                let Some(candidate) = q.waiting.pop_front() else {
                    break;
                };
                let state = q.chats.entry(candidate.clone()).or_default();
                if state.active {
                    continue;
                }
                if let Some(job) = state.pending_tasks.pop_front() {
                    state.active = true;
                    state.running_task_id = Some(job.task_id.clone());
                    q.active_count += 1;
                    woken.push(Next::Task(candidate, job));
                } else if state.pending_messages {
                    state.pending_messages = false;
                    state.active = true;
                    q.active_count += 1;
                    woken.push(Next::Batch(candidate));
                }
            }
        }
        (next, woken)
    };

    for work in std::iter::once(next).chain(woken) {
        match work {
            Next::Task(jid, job) => spawn_task(shared, jid, job),
            Next::Batch(jid) => spawn_batch(shared, jid),
            Next::Nothing => {}
        }
    }
}
