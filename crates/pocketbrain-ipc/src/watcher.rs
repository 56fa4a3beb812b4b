use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use pocketbrain_channels::ChannelRouter;
use pocketbrain_core::sanitize::strip_internal;
use pocketbrain_core::types::{ContextMode, Schedule, ScheduledTask, TaskStatus};
use pocketbrain_scheduler::schedule::{initial_next_run, validate};
use pocketbrain_store::Store;

use crate::envelope::{derive_task_id, IpcEnvelope};
use crate::snapshot::refresh_snapshot;

const ERRORS_DIR: &str = "errors";
const ERROR_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Scans per-chat IPC directories and applies agent-requested actions.
///
/// Identity is the path: `ipc/<source_folder>/…`. The body may carry a
/// `chat_folder` for logging but it is never consulted for authority.
pub struct IpcWatcher {
    root: PathBuf,
    store: Arc<Store>,
    router: Arc<ChannelRouter>,
    timezone: Tz,
    poll_interval: Duration,
}

impl IpcWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<Store>,
        router: Arc<ChannelRouter>,
        timezone: Tz,
        poll_interval: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            router,
            timezone,
            poll_interval,
        }
    }

    /// One-time housekeeping before the first tick: drop orphaned
    /// `*.json.tmp` files (interrupted atomic writes), prune quarantined
    /// files past retention, make sure every registered chat has its
    /// directory skeleton and a fresh task snapshot.
    pub fn startup_cleanup(&self) {
        remove_tmp_recursive(&self.root);

        let errors = self.root.join(ERRORS_DIR);
        if let Ok(entries) = std::fs::read_dir(&errors) {
            let cutoff = SystemTime::now() - ERROR_RETENTION;
            for entry in entries.flatten() {
                let old = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(|m| m < cutoff)
                    .unwrap_or(false);
                if old {
                    debug!(file = %entry.path().display(), "pruning old quarantined file");
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }

        if let Ok(chats) = self.store.list_chats() {
            for chat in chats {
                let dir = self.root.join(&chat.folder);
                let _ = std::fs::create_dir_all(dir.join("messages"));
                let _ = std::fs::create_dir_all(dir.join("tasks"));
                if let Ok(tasks) = self.store.tasks_for_folder(&chat.folder) {
                    refresh_snapshot(&self.root, &chat.folder, &tasks);
                }
            }
        }
    }

    /// Main loop. Scans until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(root = %self.root.display(), "ipc watcher started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ipc watcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scan over every source folder.
    pub async fn tick(&self) {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return, // no IPC tree yet
        };

        let mut changed_folders: BTreeSet<String> = BTreeSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(source) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            if source == ERRORS_DIR {
                continue;
            }
            self.process_messages(&source, &path.join("messages")).await;
            self.process_tasks(&source, &path.join("tasks"), &mut changed_folders);
        }

        for folder in changed_folders {
            if let Ok(tasks) = self.store.tasks_for_folder(&folder) {
                refresh_snapshot(&self.root, &folder, &tasks);
            }
        }
    }

    // --- messages ----------------------------------------------------------

    async fn process_messages(&self, source: &str, dir: &Path) {
        for path in json_files(dir) {
            let envelope = match read_envelope(&path) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.quarantine(&path, source, &e.to_string());
                    continue;
                }
            };
            let IpcEnvelope::Message { chat_jid, text, .. } = envelope else {
                self.quarantine(&path, source, "non-message envelope in messages/");
                continue;
            };
            if chat_jid.trim().is_empty() || text.trim().is_empty() {
                self.quarantine(&path, source, "message requires chat_jid and text");
                continue;
            }

            let target = match self.store.get_chat_by_jid(&chat_jid) {
                Ok(target) => target,
                Err(e) => {
                    // Transient store failure: leave the file for the next tick.
                    error!(%source, "chat lookup failed: {e}");
                    continue;
                }
            };
            match target {
                Some(target) if target.folder == source || self.source_is_main(source) => {
                    let clean = strip_internal(&text);
                    if clean.is_empty() {
                        debug!(%source, chat = %target.jid, "message empty after sanitization");
                    } else if let Err(e) = self.router.send(&target.jid, &clean).await {
                        error!(%source, chat = %target.jid, "ipc message send failed: {e}");
                    }
                    consume(&path);
                }
                Some(target) => {
                    warn!(
                        %source,
                        target_folder = %target.folder,
                        "blocked cross-folder message attempt"
                    );
                    consume(&path);
                }
                None => {
                    warn!(%source, chat = %chat_jid, "message targets unregistered chat");
                    consume(&path);
                }
            }
        }
    }

    // --- tasks -------------------------------------------------------------

    fn process_tasks(&self, source: &str, dir: &Path, changed: &mut BTreeSet<String>) {
        for path in json_files(dir) {
            let envelope = match read_envelope(&path) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.quarantine(&path, source, &e.to_string());
                    continue;
                }
            };
            match envelope {
                IpcEnvelope::ScheduleTask {
                    prompt,
                    schedule_type,
                    schedule_value,
                    context_mode,
                    target_jid,
                    timestamp,
                    ..
                } => {
                    self.apply_schedule_task(
                        source,
                        &path,
                        &prompt,
                        &schedule_type,
                        &schedule_value,
                        &context_mode,
                        &target_jid,
                        timestamp.as_deref().unwrap_or(""),
                        changed,
                    );
                }
                IpcEnvelope::PauseTask { task_id, .. } => {
                    self.apply_task_action(source, &path, &task_id, TaskAction::Pause, changed);
                }
                IpcEnvelope::ResumeTask { task_id, .. } => {
                    self.apply_task_action(source, &path, &task_id, TaskAction::Resume, changed);
                }
                IpcEnvelope::CancelTask { task_id, .. } => {
                    self.apply_task_action(source, &path, &task_id, TaskAction::Cancel, changed);
                }
                IpcEnvelope::Message { .. } => {
                    self.quarantine(&path, source, "message envelope in tasks/");
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_schedule_task(
        &self,
        source: &str,
        path: &Path,
        prompt: &str,
        schedule_type: &str,
        schedule_value: &str,
        context_mode: &str,
        target_jid: &str,
        timestamp: &str,
        changed: &mut BTreeSet<String>,
    ) {
        if prompt.trim().is_empty() || target_jid.trim().is_empty() {
            self.quarantine(path, source, "schedule_task requires prompt and target_jid");
            return;
        }

        let target = match self.store.get_chat_by_jid(target_jid) {
            Ok(Some(target)) => target,
            Ok(None) => {
                warn!(%source, chat = %target_jid, "schedule_task targets unregistered chat");
                consume(path);
                return;
            }
            Err(e) => {
                error!(%source, "chat lookup failed: {e}");
                return;
            }
        };
        if target.folder != source && !self.source_is_main(source) {
            warn!(
                %source,
                target_folder = %target.folder,
                "blocked cross-folder schedule_task attempt"
            );
            consume(path);
            return;
        }

        let schedule = match Schedule::from_parts(schedule_type, schedule_value) {
            Ok(schedule) => schedule,
            Err(e) => {
                self.quarantine(path, source, &e);
                return;
            }
        };
        let now = Utc::now();
        if let Err(e) = validate(&schedule, now) {
            self.quarantine(path, source, &e.to_string());
            return;
        }
        let mode = match ContextMode::from_str(context_mode) {
            Ok(mode) => mode,
            Err(e) => {
                self.quarantine(path, source, &e);
                return;
            }
        };
        let Some(next_run) = initial_next_run(&schedule, now, self.timezone) else {
            self.quarantine(path, source, "schedule has no upcoming occurrence");
            return;
        };

        let id = derive_task_id(
            source,
            prompt,
            schedule_type,
            schedule_value,
            target_jid,
            timestamp,
        );
        let task = ScheduledTask {
            id: id.clone(),
            chat_folder: target.folder.clone(),
            chat_jid: target.jid.clone(),
            prompt: prompt.to_string(),
            schedule,
            context_mode: mode,
            next_run: Some(next_run.to_rfc3339()),
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            created_at: now.to_rfc3339(),
        };
        if let Err(e) = self.store.create_task(&task) {
            // Transient store failure: leave the file for the next tick.
            error!(%source, task = %id, "task create failed: {e}");
            return;
        }
        info!(%source, task = %id, folder = %target.folder, "task scheduled via ipc");
        changed.insert(target.folder);
        consume(path);
    }

    fn apply_task_action(
        &self,
        source: &str,
        path: &Path,
        task_id: &str,
        action: TaskAction,
        changed: &mut BTreeSet<String>,
    ) {
        let task = match self.store.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(%source, task = %task_id, "task action targets unknown task");
                consume(path);
                return;
            }
            Err(e) => {
                error!(%source, "task lookup failed: {e}");
                return;
            }
        };
        if task.chat_folder != source && !self.source_is_main(source) {
            warn!(
                %source,
                task = %task_id,
                task_folder = %task.chat_folder,
                "blocked cross-folder task action"
            );
            consume(path);
            return;
        }

        let applied = match action {
            TaskAction::Pause => {
                let mut updated = task.clone();
                updated.status = TaskStatus::Paused;
                self.store.update_task(&updated).map(|_| "paused")
            }
            TaskAction::Resume => {
                let mut updated = task.clone();
                updated.status = TaskStatus::Active;
                // Resume re-anchors from *now*; only a one-shot keeps its
                // original instant.
                if !matches!(task.schedule, Schedule::Once { .. }) {
                    updated.next_run = initial_next_run(&task.schedule, Utc::now(), self.timezone)
                        .map(|dt| dt.to_rfc3339());
                }
                self.store.update_task(&updated).map(|_| "resumed")
            }
            TaskAction::Cancel => self.store.delete_task(&task.id).map(|_| "cancelled"),
        };
        match applied {
            Ok(verb) => {
                info!(%source, task = %task_id, "task {verb} via ipc");
                changed.insert(task.chat_folder);
                consume(path);
            }
            Err(e) => {
                error!(%source, task = %task_id, "task action failed: {e}");
            }
        }
    }

    // --- helpers -----------------------------------------------------------

    fn source_is_main(&self, source: &str) -> bool {
        self.store
            .get_chat_by_folder(source)
            .ok()
            .flatten()
            .map(|chat| chat.is_main)
            .unwrap_or(false)
    }

    fn quarantine(&self, path: &Path, source: &str, reason: &str) {
        warn!(%source, file = %path.display(), "quarantining ipc file: {reason}");
        let errors = self.root.join(ERRORS_DIR);
        let _ = std::fs::create_dir_all(&errors);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed.json");
        if let Err(e) = std::fs::rename(path, errors.join(format!("{source}-{name}"))) {
            error!(file = %path.display(), "quarantine move failed: {e}");
            let _ = std::fs::remove_file(path);
        }
    }
}

enum TaskAction {
    Pause,
    Resume,
    Cancel,
}

/// `*.json` entries of a directory in name order; `.tmp` and anything
/// else is invisible to the watcher.
fn json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

fn read_envelope(path: &Path) -> crate::error::Result<IpcEnvelope> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn consume(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        error!(file = %path.display(), "ipc file delete failed: {e}");
    }
}

fn remove_tmp_recursive(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_tmp_recursive(&path);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".json.tmp"))
        {
            debug!(file = %path.display(), "removing orphaned tmp file");
            let _ = std::fs::remove_file(&path);
        }
    }
}
