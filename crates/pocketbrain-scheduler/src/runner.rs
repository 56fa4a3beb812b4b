//! Execution of one fired task under its chat's queue slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use pocketbrain_channels::ChannelRouter;
use pocketbrain_core::sanitize::strip_internal;
use pocketbrain_core::types::{ContextMode, Schedule, ScheduledTask, TaskStatus};
use pocketbrain_sessions::{
    IdleTimer, OutputSink, SessionChat, SessionInput, SessionManager, SessionOutput,
};
use pocketbrain_store::Store;

use crate::schedule::next_run_after_fire;

/// Stored `last_result` is truncated to this many characters.
const LAST_RESULT_MAX: usize = 500;

/// Everything a task execution needs, cloned into each thunk.
pub struct TaskDeps {
    pub store: Arc<Store>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<ChannelRouter>,
    pub timezone: Tz,
    pub idle_timeout: Duration,
}

/// Run one fired task to completion.
///
/// The firing is recorded (last_run, last_result, drift-free next_run,
/// completed status for one-shots) as soon as the first prompt
/// finishes — the session may then stay open for follow-ups until the
/// idle timer retires it, without delaying the next firing's schedule.
pub async fn run_task(deps: Arc<TaskDeps>, task: ScheduledTask) {
    let fired_at = Utc::now();
    // The previous planned time is the interval anchor; a missing
    // next_run (should not happen for an active task) falls back to now.
    let anchor = task
        .next_run
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fired_at);

    let chat = match deps.store.get_chat_by_folder(&task.chat_folder) {
        Ok(Some(chat)) => chat,
        Ok(None) => {
            warn!(task = %task.id, folder = %task.chat_folder, "task chat is not registered");
            record_error_run(&deps.store, &task, "chat folder not registered");
            return;
        }
        Err(e) => {
            error!(task = %task.id, "chat lookup failed: {e}");
            return;
        }
    };

    // Group context joins the chat's persisted session; isolated always
    // forces a fresh one, registered under a synthetic key so chat
    // follow-ups can never route into it.
    let (registry_key, session_id) = match task.context_mode {
        ContextMode::Group => (
            chat.jid.clone(),
            deps.store.get_session(&task.chat_folder).ok().flatten(),
        ),
        ContextMode::Isolated => (format!("task:{}", task.id), None),
    };

    info!(task = %task.id, chat = %chat.jid, mode = %task.context_mode, "running scheduled task");

    let timer = Arc::new(IdleTimer::start(deps.idle_timeout, {
        let sessions = Arc::clone(&deps.sessions);
        let key = registry_key.clone();
        move || sessions.abort_if_idle(&key)
    }));

    let recorded = Arc::new(AtomicBool::new(false));
    let last_text: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let on_output: OutputSink = {
        let deps = Arc::clone(&deps);
        let task = task.clone();
        let chat_jid = chat.jid.clone();
        let timer = Arc::clone(&timer);
        let recorded = Arc::clone(&recorded);
        let last_text = Arc::clone(&last_text);
        Arc::new(move |output| match output {
            SessionOutput::Text(text) => {
                let clean = strip_internal(&text);
                if clean.is_empty() {
                    return;
                }
                timer.touch();
                *last_text.lock().unwrap() = Some(clean.clone());
                let router = Arc::clone(&deps.router);
                let jid = chat_jid.clone();
                tokio::spawn(async move {
                    if let Err(e) = router.send(&jid, &clean).await {
                        error!(chat = %jid, "task result delivery failed: {e}");
                    }
                });
            }
            SessionOutput::SessionUpdate { session_id } => {
                if task.context_mode == ContextMode::Group {
                    if let Err(e) = deps.store.set_session(&task.chat_folder, &session_id) {
                        error!(task = %task.id, "session persist failed: {e}");
                    }
                }
                // First prompt finished: record the firing now, not at
                // session close, so the cadence never waits on idle-abort.
                if !recorded.swap(true, Ordering::SeqCst) {
                    let result = last_text
                        .lock()
                        .unwrap()
                        .clone()
                        .unwrap_or_else(|| "(no output)".to_string());
                    record_fire(&deps, &task, anchor, &result);
                }
            }
        })
    };

    let input = SessionInput {
        registry_key: registry_key.clone(),
        chat: SessionChat {
            jid: chat.jid.clone(),
            folder: chat.folder.clone(),
            name: chat.name.clone(),
            is_main: chat.is_main,
        },
        session_id,
        prompt: task.prompt.clone(),
        is_scheduled_task: true,
        instructions: None,
    };

    let result = deps.sessions.run_session(input, on_output).await;
    timer.stop();

    match result {
        Ok(()) => {
            if !recorded.swap(true, Ordering::SeqCst) {
                record_fire(&deps, &task, anchor, "(no output)");
            }
        }
        Err(e) => {
            warn!(task = %task.id, "task run failed: {e}");
            if recorded.swap(true, Ordering::SeqCst) {
                // Firing already recorded; overwrite the result only.
                if let Ok(Some(mut fresh)) = deps.store.get_task(&task.id) {
                    fresh.last_result = Some(truncate_result(&format!("error: {e}")));
                    if let Err(e) = deps.store.update_task(&fresh) {
                        error!(task = %task.id, "task error record failed: {e}");
                    }
                }
            } else {
                record_fire(&deps, &task, anchor, &format!("error: {e}"));
            }
        }
    }
}

/// Persist one firing: last_run, truncated last_result, drift-free
/// next_run, completed status for exhausted schedules.
fn record_fire(deps: &Arc<TaskDeps>, task: &ScheduledTask, anchor: DateTime<Utc>, result: &str) {
    let now = Utc::now();
    let next = next_run_after_fire(&task.schedule, anchor, now, deps.timezone);
    let mut updated = task.clone();
    updated.last_run = Some(now.to_rfc3339());
    updated.last_result = Some(truncate_result(result));
    updated.next_run = next.map(|dt| dt.to_rfc3339());
    updated.status = if matches!(task.schedule, Schedule::Once { .. }) || next.is_none() {
        TaskStatus::Completed
    } else {
        task.status
    };
    if let Err(e) = deps.store.update_task(&updated) {
        error!(task = %task.id, "task fire record failed: {e}");
    }
}

/// Record a failed attempt without advancing the schedule.
fn record_error_run(store: &Store, task: &ScheduledTask, reason: &str) {
    let mut updated = task.clone();
    updated.last_run = Some(Utc::now().to_rfc3339());
    updated.last_result = Some(truncate_result(&format!("error: {reason}")));
    if let Err(e) = store.update_task(&updated) {
        error!(task = %task.id, "task error record failed: {e}");
    }
}

fn truncate_result(text: &str) -> String {
    if text.chars().count() <= LAST_RESULT_MAX {
        return text.to_string();
    }
    let cut: String = text.chars().take(LAST_RESULT_MAX).collect();
    format!("{cut}…")
}
