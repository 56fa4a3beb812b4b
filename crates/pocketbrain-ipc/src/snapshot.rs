use std::path::Path;

use tracing::error;

use pocketbrain_core::types::ScheduledTask;

use crate::error::Result;

/// Write the host-owned `current_tasks.json` snapshot for one chat
/// folder, atomically (tmp + rename). Agent tools read this file to
/// list the chat's tasks without touching the database.
pub fn write_current_tasks(ipc_root: &Path, folder: &str, tasks: &[ScheduledTask]) -> Result<()> {
    let dir = ipc_root.join(folder);
    std::fs::create_dir_all(&dir)?;
    let tmp = dir.join("current_tasks.json.tmp");
    let target = dir.join("current_tasks.json");
    let body = serde_json::to_vec_pretty(tasks)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, &target)?;
    Ok(())
}

/// Best-effort snapshot refresh; failures are logged, never fatal.
pub fn refresh_snapshot(ipc_root: &Path, folder: &str, tasks: &[ScheduledTask]) {
    if let Err(e) = write_current_tasks(ipc_root, folder, tasks) {
        error!(%folder, "task snapshot write failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocketbrain_core::types::{ContextMode, Schedule, TaskStatus};

    #[test]
    fn snapshot_is_written_and_replaced_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let task = ScheduledTask {
            id: "task-1".to_string(),
            chat_folder: "family".to_string(),
            chat_jid: "123@g.us".to_string(),
            prompt: "p".to_string(),
            schedule: Schedule::Interval { every_ms: 60_000 },
            context_mode: ContextMode::Group,
            next_run: Some("2026-01-01T00:01:00Z".to_string()),
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };

        write_current_tasks(dir.path(), "family", &[task.clone()]).unwrap();
        let path = dir.path().join("family/current_tasks.json");
        let read: Vec<ScheduledTask> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, "task-1");
        // No tmp residue.
        assert!(!dir.path().join("family/current_tasks.json.tmp").exists());

        write_current_tasks(dir.path(), "family", &[]).unwrap();
        let read: Vec<ScheduledTask> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(read.is_empty());
    }
}
