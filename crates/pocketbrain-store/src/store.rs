use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use pocketbrain_core::types::{
    Chat, ChatMessage, ContextMode, OutboxEntry, Schedule, ScheduledTask, TaskStatus,
};

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Durable record of chats, messages, cursors, session bindings,
/// scheduled tasks and the outbound retry queue.
///
/// All access goes through one `Mutex<Connection>`: a single logical
/// writer, as many readers as care to wait for the lock. The lock is
/// never held across an await point — every method is synchronous.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // --- chats -------------------------------------------------------------

    /// Register a chat. `folder` must be unique; passing `is_main = true`
    /// demotes any previous main chat in the same transaction so at most
    /// one main chat ever exists.
    pub fn register_chat(&self, jid: &str, name: &str, folder: &str, is_main: bool) -> Result<Chat> {
        let now = Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        if is_main {
            tx.execute("UPDATE chats SET is_main = 0 WHERE is_main = 1", [])?;
        }
        tx.execute(
            "INSERT INTO chats (jid, name, folder, is_main, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![jid, name, folder, is_main, now],
        )?;
        tx.commit()?;
        info!(chat = %jid, %folder, is_main, "chat registered");
        Ok(Chat {
            jid: jid.to_string(),
            name: name.to_string(),
            folder: folder.to_string(),
            is_main,
            added_at: now,
        })
    }

    /// Remove a chat together with its processed cursor and session
    /// binding, as one transaction.
    pub fn unregister_chat(&self, jid: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let folder: Option<String> = tx
            .query_row("SELECT folder FROM chats WHERE jid = ?1", [jid], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(folder) = folder else {
            return Err(StoreError::ChatNotFound {
                key: jid.to_string(),
            });
        };
        tx.execute("DELETE FROM chats WHERE jid = ?1", [jid])?;
        tx.execute(
            "DELETE FROM cursors WHERE name = ?1",
            [processed_cursor_name(jid)],
        )?;
        tx.execute("DELETE FROM sessions WHERE chat_folder = ?1", [&folder])?;
        tx.commit()?;
        info!(chat = %jid, %folder, "chat unregistered");
        Ok(())
    }

    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT jid, name, folder, is_main, added_at FROM chats ORDER BY added_at",
        )?;
        let chats = stmt
            .query_map([], row_to_chat)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(chats)
    }

    pub fn get_chat_by_jid(&self, jid: &str) -> Result<Option<Chat>> {
        let db = self.db.lock().unwrap();
        let chat = db
            .query_row(
                "SELECT jid, name, folder, is_main, added_at FROM chats WHERE jid = ?1",
                [jid],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    pub fn get_chat_by_folder(&self, folder: &str) -> Result<Option<Chat>> {
        let db = self.db.lock().unwrap();
        let chat = db
            .query_row(
                "SELECT jid, name, folder, is_main, added_at FROM chats WHERE folder = ?1",
                [folder],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    /// The designated main chat, if one exists.
    pub fn main_chat(&self) -> Result<Option<Chat>> {
        let db = self.db.lock().unwrap();
        let chat = db
            .query_row(
                "SELECT jid, name, folder, is_main, added_at FROM chats WHERE is_main = 1",
                [],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    // --- messages ----------------------------------------------------------

    /// Persist an observed message. Idempotent on `(chat_jid, id)` —
    /// duplicate delivery from the channel is expected. Returns whether
    /// a new row was inserted.
    pub fn record_message(&self, msg: &ChatMessage) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO messages
             (chat_jid, id, sender, sender_name, content, timestamp, is_from_me, is_bot_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                msg.chat_jid,
                msg.id,
                msg.sender,
                msg.sender_name,
                msg.content,
                msg.timestamp,
                msg.is_from_me,
                msg.is_bot_message,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Messages of one chat strictly after `cursor`, in timestamp order
    /// (message id as tiebreak so the order is total even for equal
    /// timestamps).
    pub fn messages_after(&self, chat_jid: &str, cursor: &str) -> Result<Vec<ChatMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT chat_jid, id, sender, sender_name, content, timestamp,
                    is_from_me, is_bot_message
             FROM messages
             WHERE chat_jid = ?1 AND timestamp > ?2
             ORDER BY timestamp, id",
        )?;
        let msgs = stmt
            .query_map(rusqlite::params![chat_jid, cursor], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(msgs)
    }

    /// Messages across all chats strictly after `cursor`.
    pub fn messages_after_global(&self, cursor: &str) -> Result<Vec<ChatMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT chat_jid, id, sender, sender_name, content, timestamp,
                    is_from_me, is_bot_message
             FROM messages
             WHERE timestamp > ?1
             ORDER BY timestamp, id",
        )?;
        let msgs = stmt
            .query_map([cursor], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(msgs)
    }

    // --- cursors -----------------------------------------------------------

    pub fn get_cursor(&self, name: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let value = db
            .query_row("SELECT value FROM cursors WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_cursor(&self, name: &str, value: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cursors (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            rusqlite::params![name, value],
        )?;
        Ok(())
    }

    /// Global max timestamp observed across all chats.
    pub fn seen_cursor(&self) -> Result<String> {
        Ok(self.get_cursor("seen")?.unwrap_or_default())
    }

    pub fn set_seen_cursor(&self, value: &str) -> Result<()> {
        self.set_cursor("seen", value)
    }

    /// Per-chat max timestamp the agent has produced output for.
    pub fn processed_cursor(&self, chat_jid: &str) -> Result<String> {
        Ok(self
            .get_cursor(&processed_cursor_name(chat_jid))?
            .unwrap_or_default())
    }

    pub fn set_processed_cursor(&self, chat_jid: &str, value: &str) -> Result<()> {
        self.set_cursor(&processed_cursor_name(chat_jid), value)
    }

    // --- session bindings --------------------------------------------------

    pub fn get_session(&self, folder: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let id = db
            .query_row(
                "SELECT session_id FROM sessions WHERE chat_folder = ?1",
                [folder],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn set_session(&self, folder: &str, session_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions (chat_folder, session_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_folder) DO UPDATE
                SET session_id = excluded.session_id,
                    updated_at = excluded.updated_at",
            rusqlite::params![folder, session_id, now],
        )?;
        Ok(())
    }

    pub fn clear_session(&self, folder: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM sessions WHERE chat_folder = ?1", [folder])?;
        Ok(())
    }

    // --- scheduled tasks ---------------------------------------------------

    /// Insert or replace a task by id.
    ///
    /// The upsert is what makes IPC-driven task creation idempotent: the
    /// watcher derives a deterministic id from the envelope, so replaying
    /// the same file after a crash rewrites the identical row.
    pub fn create_task(&self, task: &ScheduledTask) -> Result<()> {
        let (kind, value) = task.schedule.parts();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO tasks
             (id, chat_folder, chat_jid, prompt, schedule_kind, schedule_value,
              context_mode, next_run, last_run, last_result, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                task.id,
                task.chat_folder,
                task.chat_jid,
                task.prompt,
                kind,
                value,
                task.context_mode.to_string(),
                task.next_run,
                task.last_run,
                task.last_result,
                task.status.to_string(),
                task.created_at,
            ],
        )?;
        info!(task = %task.id, folder = %task.chat_folder, kind, "task stored");
        Ok(())
    }

    /// Update the mutable fields of an existing task.
    pub fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE tasks
             SET next_run = ?1, last_run = ?2, last_result = ?3, status = ?4
             WHERE id = ?5",
            rusqlite::params![
                task.next_run,
                task.last_run,
                task.last_result,
                task.status.to_string(),
                task.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::TaskNotFound {
                id: task.id.clone(),
            });
        }
        Ok(())
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::TaskNotFound { id: id.to_string() });
        }
        info!(task = %id, "task deleted");
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                &format!("{TASK_SELECT} WHERE id = ?1"),
                [id],
                row_to_task_parts,
            )
            .optional()?;
        match row {
            Some(parts) => Ok(Some(parts_to_task(parts)?)),
            None => Ok(None),
        }
    }

    pub fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        self.query_tasks(&format!("{TASK_SELECT} ORDER BY created_at"), &[])
    }

    pub fn tasks_for_folder(&self, folder: &str) -> Result<Vec<ScheduledTask>> {
        self.query_tasks(
            &format!("{TASK_SELECT} WHERE chat_folder = ?1 ORDER BY created_at"),
            &[folder],
        )
    }

    /// Active tasks whose `next_run` has arrived, soonest first.
    pub fn due_tasks(&self, now: &str) -> Result<Vec<ScheduledTask>> {
        self.query_tasks(
            &format!(
                "{TASK_SELECT}
                 WHERE status = 'active' AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run"
            ),
            &[now],
        )
    }

    fn query_tasks(&self, sql: &str, params: &[&str]) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(sql)?;
        let rows: Vec<TaskParts> = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_task_parts)?
            .filter_map(|r| r.ok())
            .collect();
        // Rows that fail to decode are skipped with a warning rather than
        // poisoning the whole listing.
        let tasks = rows
            .into_iter()
            .filter_map(|parts| match parts_to_task(parts) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!("skipping undecodable task row: {e}");
                    None
                }
            })
            .collect();
        Ok(tasks)
    }

    // --- outbox ------------------------------------------------------------

    /// Park an outbound message for later delivery. Returns the row id.
    pub fn outbox_enqueue(&self, channel: &str, recipient: &str, text: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO outbox (channel, recipient, text, attempts, next_retry, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            rusqlite::params![channel, recipient, text, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Entries for `channel` whose retry time has arrived, oldest first.
    pub fn outbox_pending(&self, channel: &str, now: &str) -> Result<Vec<OutboxEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, channel, recipient, text, attempts, next_retry, created_at
             FROM outbox
             WHERE channel = ?1 AND next_retry <= ?2
             ORDER BY id",
        )?;
        let entries = stmt
            .query_map(rusqlite::params![channel, now], |row| {
                Ok(OutboxEntry {
                    id: row.get(0)?,
                    channel: row.get(1)?,
                    recipient: row.get(2)?,
                    text: row.get(3)?,
                    attempts: row.get::<_, i64>(4)? as u32,
                    next_retry: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Delete a delivered entry.
    pub fn outbox_ack(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM outbox WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Record a failed attempt and push the retry time out.
    pub fn outbox_mark_retry(&self, id: i64, attempts: u32, next_retry: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE outbox SET attempts = ?1, next_retry = ?2 WHERE id = ?3",
            rusqlite::params![attempts, next_retry, id],
        )?;
        Ok(())
    }
}

fn processed_cursor_name(chat_jid: &str) -> String {
    format!("processed:{chat_jid}")
}

const TASK_SELECT: &str = "SELECT id, chat_folder, chat_jid, prompt, schedule_kind,
        schedule_value, context_mode, next_run, last_run, last_result, status, created_at
 FROM tasks";

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        jid: row.get(0)?,
        name: row.get(1)?,
        folder: row.get(2)?,
        is_main: row.get(3)?,
        added_at: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        chat_jid: row.get(0)?,
        id: row.get(1)?,
        sender: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        timestamp: row.get(5)?,
        is_from_me: row.get(6)?,
        is_bot_message: row.get(7)?,
    })
}

/// Raw column tuple for a task row; decoded by [`parts_to_task`] so the
/// rusqlite mapper stays infallible.
type TaskParts = (
    String,         // id
    String,         // chat_folder
    String,         // chat_jid
    String,         // prompt
    String,         // schedule_kind
    String,         // schedule_value
    String,         // context_mode
    Option<String>, // next_run
    Option<String>, // last_run
    Option<String>, // last_result
    String,         // status
    String,         // created_at
);

fn row_to_task_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn parts_to_task(parts: TaskParts) -> Result<ScheduledTask> {
    let (
        id,
        chat_folder,
        chat_jid,
        prompt,
        schedule_kind,
        schedule_value,
        context_mode,
        next_run,
        last_run,
        last_result,
        status,
        created_at,
    ) = parts;
    let schedule =
        Schedule::from_parts(&schedule_kind, &schedule_value).map_err(|reason| {
            StoreError::Corrupt {
                table: "tasks".to_string(),
                reason,
            }
        })?;
    let context_mode = ContextMode::from_str(&context_mode).map_err(|reason| StoreError::Corrupt {
        table: "tasks".to_string(),
        reason,
    })?;
    let status = TaskStatus::from_str(&status).map_err(|reason| StoreError::Corrupt {
        table: "tasks".to_string(),
        reason,
    })?;
    Ok(ScheduledTask {
        id,
        chat_folder,
        chat_jid,
        prompt,
        schedule,
        context_mode,
        next_run,
        last_run,
        last_result,
        status,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocketbrain_core::types::{ContextMode, Schedule, TaskStatus};

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn msg(chat: &str, id: &str, ts: &str, content: &str) -> ChatMessage {
        ChatMessage {
            chat_jid: chat.to_string(),
            id: id.to_string(),
            sender: "user@s".to_string(),
            sender_name: "User".to_string(),
            content: content.to_string(),
            timestamp: ts.to_string(),
            is_from_me: false,
            is_bot_message: false,
        }
    }

    fn task(id: &str, next_run: Option<&str>, status: TaskStatus) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            chat_folder: "family".to_string(),
            chat_jid: "123@g.us".to_string(),
            prompt: "check the weather".to_string(),
            schedule: Schedule::Interval { every_ms: 60_000 },
            context_mode: ContextMode::Group,
            next_run: next_run.map(String::from),
            last_run: None,
            last_result: None,
            status,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn record_message_is_idempotent() {
        let store = store();
        let m = msg("a@g.us", "m1", "2026-01-01T00:00:01Z", "hello");
        assert!(store.record_message(&m).unwrap());
        assert!(!store.record_message(&m).unwrap());
        assert_eq!(store.messages_after("a@g.us", "").unwrap().len(), 1);
    }

    #[test]
    fn messages_after_is_ordered_and_exclusive() {
        let store = store();
        for (id, ts) in [("m2", "2026-01-01T00:00:02Z"), ("m1", "2026-01-01T00:00:01Z")] {
            store.record_message(&msg("a@g.us", id, ts, id)).unwrap();
        }
        let all = store.messages_after("a@g.us", "").unwrap();
        assert_eq!(
            all.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            ["m1", "m2"]
        );
        let after = store
            .messages_after("a@g.us", "2026-01-01T00:00:01Z")
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, "m2");
    }

    #[test]
    fn global_query_spans_chats() {
        let store = store();
        store
            .record_message(&msg("a@g.us", "m1", "2026-01-01T00:00:01Z", "a"))
            .unwrap();
        store
            .record_message(&msg("b@g.us", "m1", "2026-01-01T00:00:02Z", "b"))
            .unwrap();
        assert_eq!(store.messages_after_global("").unwrap().len(), 2);
    }

    #[test]
    fn cursors_default_empty_and_round_trip() {
        let store = store();
        assert_eq!(store.seen_cursor().unwrap(), "");
        store.set_seen_cursor("2026-01-01T00:00:05Z").unwrap();
        assert_eq!(store.seen_cursor().unwrap(), "2026-01-01T00:00:05Z");

        assert_eq!(store.processed_cursor("a@g.us").unwrap(), "");
        store
            .set_processed_cursor("a@g.us", "2026-01-01T00:00:03Z")
            .unwrap();
        assert_eq!(
            store.processed_cursor("a@g.us").unwrap(),
            "2026-01-01T00:00:03Z"
        );
    }

    #[test]
    fn at_most_one_main_chat() {
        let store = store();
        store.register_chat("a@g.us", "A", "alpha", true).unwrap();
        store.register_chat("b@g.us", "B", "beta", true).unwrap();
        let main = store.main_chat().unwrap().unwrap();
        assert_eq!(main.jid, "b@g.us");
        assert!(!store.get_chat_by_jid("a@g.us").unwrap().unwrap().is_main);
    }

    #[test]
    fn unregister_removes_cursor_and_session() {
        let store = store();
        store.register_chat("a@g.us", "A", "alpha", false).unwrap();
        store
            .set_processed_cursor("a@g.us", "2026-01-01T00:00:01Z")
            .unwrap();
        store.set_session("alpha", "ses-1").unwrap();

        store.unregister_chat("a@g.us").unwrap();
        assert!(store.get_chat_by_jid("a@g.us").unwrap().is_none());
        assert_eq!(store.processed_cursor("a@g.us").unwrap(), "");
        assert!(store.get_session("alpha").unwrap().is_none());
    }

    #[test]
    fn unregister_unknown_chat_errors() {
        let store = store();
        assert!(matches!(
            store.unregister_chat("nope@g.us"),
            Err(StoreError::ChatNotFound { .. })
        ));
    }

    #[test]
    fn session_binding_upserts() {
        let store = store();
        store.set_session("alpha", "ses-1").unwrap();
        store.set_session("alpha", "ses-2").unwrap();
        assert_eq!(store.get_session("alpha").unwrap().unwrap(), "ses-2");
        store.clear_session("alpha").unwrap();
        assert!(store.get_session("alpha").unwrap().is_none());
    }

    #[test]
    fn create_task_is_an_upsert() {
        let store = store();
        let t = task("task-1", Some("2026-01-01T00:01:00Z"), TaskStatus::Active);
        store.create_task(&t).unwrap();
        store.create_task(&t).unwrap();
        assert_eq!(store.list_tasks().unwrap().len(), 1);
    }

    #[test]
    fn due_tasks_respects_status_and_time() {
        let store = store();
        store
            .create_task(&task("due", Some("2026-01-01T00:01:00Z"), TaskStatus::Active))
            .unwrap();
        store
            .create_task(&task(
                "future",
                Some("2026-01-01T09:00:00Z"),
                TaskStatus::Active,
            ))
            .unwrap();
        store
            .create_task(&task(
                "paused",
                Some("2026-01-01T00:01:00Z"),
                TaskStatus::Paused,
            ))
            .unwrap();

        let due = store.due_tasks("2026-01-01T00:05:00Z").unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "due");
    }

    #[test]
    fn update_task_mutates_lifecycle_fields() {
        let store = store();
        let mut t = task("task-1", Some("2026-01-01T00:01:00Z"), TaskStatus::Active);
        store.create_task(&t).unwrap();

        t.last_run = Some("2026-01-01T00:01:05Z".to_string());
        t.last_result = Some("ok".to_string());
        t.next_run = Some("2026-01-01T00:02:00Z".to_string());
        store.update_task(&t).unwrap();

        let read = store.get_task("task-1").unwrap().unwrap();
        assert_eq!(read.next_run.as_deref(), Some("2026-01-01T00:02:00Z"));
        assert_eq!(read.last_result.as_deref(), Some("ok"));
    }

    #[test]
    fn update_unknown_task_errors() {
        let store = store();
        let t = task("ghost", None, TaskStatus::Completed);
        assert!(matches!(
            store.update_task(&t),
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn outbox_lifecycle() {
        let store = store();
        let id = store.outbox_enqueue("mock", "a@g.us", "hello").unwrap();

        let pending = store
            .outbox_pending("mock", "2099-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, "hello");

        store
            .outbox_mark_retry(id, 1, "2099-06-01T00:00:00Z")
            .unwrap();
        assert!(store
            .outbox_pending("mock", "2099-01-01T00:00:00Z")
            .unwrap()
            .is_empty());

        store.outbox_ack(id).unwrap();
        assert!(store
            .outbox_pending("mock", "2100-01-01T00:00:00Z")
            .unwrap()
            .is_empty());
    }
}
