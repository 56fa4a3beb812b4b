use rusqlite::Connection;

use crate::error::Result;

/// Initialise all tables and indexes. Safe to call on every startup
/// (idempotent — uses `IF NOT EXISTS` throughout).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chats (
            jid       TEXT PRIMARY KEY,
            name      TEXT NOT NULL,
            folder    TEXT NOT NULL UNIQUE,
            is_main   INTEGER NOT NULL DEFAULT 0,
            added_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            chat_jid        TEXT NOT NULL,
            id              TEXT NOT NULL,
            sender          TEXT NOT NULL,
            sender_name     TEXT NOT NULL,
            content         TEXT NOT NULL,
            timestamp       TEXT NOT NULL,
            is_from_me      INTEGER NOT NULL DEFAULT 0,
            is_bot_message  INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (chat_jid, id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
            ON messages(chat_jid, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_ts
            ON messages(timestamp);

        CREATE TABLE IF NOT EXISTS cursors (
            name   TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            chat_folder  TEXT PRIMARY KEY,
            session_id   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id              TEXT PRIMARY KEY,
            chat_folder     TEXT NOT NULL,
            chat_jid        TEXT NOT NULL,
            prompt          TEXT NOT NULL,
            schedule_kind   TEXT NOT NULL,
            schedule_value  TEXT NOT NULL,
            context_mode    TEXT NOT NULL,
            next_run        TEXT,
            last_run        TEXT,
            last_result     TEXT,
            status          TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_due
            ON tasks(status, next_run);
        CREATE INDEX IF NOT EXISTS idx_tasks_folder
            ON tasks(chat_folder);

        CREATE TABLE IF NOT EXISTS outbox (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            channel     TEXT NOT NULL,
            recipient   TEXT NOT NULL,
            text        TEXT NOT NULL,
            attempts    INTEGER NOT NULL DEFAULT 0,
            next_retry  TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_due
            ON outbox(channel, next_retry);",
    )?;
    Ok(())
}
