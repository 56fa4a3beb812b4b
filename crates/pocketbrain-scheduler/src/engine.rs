use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use pocketbrain_core::types::TaskStatus;
use pocketbrain_queue::ChatQueue;
use pocketbrain_store::Store;

use crate::runner::{run_task, TaskDeps};

/// Discovers due tasks and feeds them to the queue.
///
/// Exactly-once per firing rests on three legs: the due query is a
/// snapshot, every row is re-read before enqueueing (dedupe against a
/// concurrent pause/cancel), and the queue drops a task id that is
/// already queued or running.
pub struct Scheduler {
    store: Arc<Store>,
    queue: Arc<ChatQueue>,
    deps: Arc<TaskDeps>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<ChatQueue>,
        deps: Arc<TaskDeps>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            deps,
            tick_interval,
        }
    }

    /// Main loop. Polls until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass: snapshot due tasks, re-validate each, enqueue.
    pub async fn tick(&self) {
        let now = Utc::now().to_rfc3339();
        let due = match self.store.due_tasks(&now) {
            Ok(due) => due,
            Err(e) => {
                error!("due-task query failed: {e}");
                return;
            }
        };

        for task in due {
            // Re-read between the snapshot and the side-effectful
            // enqueue; a task paused or cancelled in the gap is skipped.
            let fresh = match self.store.get_task(&task.id) {
                Ok(Some(fresh)) => fresh,
                Ok(None) => continue,
                Err(e) => {
                    error!(task = %task.id, "task re-read failed: {e}");
                    continue;
                }
            };
            if fresh.status != TaskStatus::Active {
                continue;
            }

            info!(task = %fresh.id, chat = %fresh.chat_jid, "task due");
            let deps = Arc::clone(&self.deps);
            let chat_jid = fresh.chat_jid.clone();
            let task_id = fresh.id.clone();
            self.queue.enqueue_task(
                &chat_jid,
                &task_id,
                Box::new(move || Box::pin(run_task(deps, fresh))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration as ChronoDuration;
    use chrono_tz::Tz;

    use pocketbrain_agent::mock::{MockAgentRuntime, ScriptedReply};
    use pocketbrain_agent::AgentRuntime;
    use pocketbrain_channels::mock::MockChannel;
    use pocketbrain_channels::ChannelRouter;
    use pocketbrain_core::types::{ContextMode, Schedule, ScheduledTask};
    use pocketbrain_queue::QueueSettings;
    use pocketbrain_sessions::{SessionManager, SessionTimeouts};

    struct Fixture {
        store: Arc<Store>,
        mock_runtime: Arc<MockAgentRuntime>,
        mock_channel: Arc<MockChannel>,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .register_chat("123@mock", "Family", "family", false)
            .unwrap();

        let mock_runtime = Arc::new(MockAgentRuntime::new());
        let runtime: Arc<dyn AgentRuntime> = mock_runtime.clone();
        let sessions = Arc::new(SessionManager::new(runtime, SessionTimeouts::default()));
        let queue = Arc::new(ChatQueue::new(
            Arc::clone(&sessions),
            QueueSettings::default(),
        ));

        let mock_channel = Arc::new(MockChannel::new("mock", "@mock"));
        let mut router = ChannelRouter::new(Arc::clone(&store));
        router.register(mock_channel.clone());

        let deps = Arc::new(TaskDeps {
            store: Arc::clone(&store),
            sessions,
            router: Arc::new(router),
            timezone: Tz::UTC,
            // Short so task sessions retire quickly in tests.
            idle_timeout: Duration::from_millis(100),
        });

        let scheduler = Scheduler::new(
            Arc::clone(&store),
            queue,
            deps,
            Duration::from_secs(60),
        );

        Fixture {
            store,
            mock_runtime,
            mock_channel,
            scheduler,
        }
    }

    fn task(id: &str, schedule: Schedule, next_run: &str, mode: ContextMode) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            chat_folder: "family".to_string(),
            chat_jid: "123@mock".to_string(),
            prompt: "morning briefing".to_string(),
            schedule,
            context_mode: mode,
            next_run: Some(next_run.to_string()),
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn interval_task_fires_and_anchors_next_run() {
        let f = fixture();
        f.mock_runtime
            .script(ScriptedReply::Text("briefing ready".to_string()));

        // Fire 35 seconds late: the successor must land on anchor + 60s.
        let anchor = Utc::now() - ChronoDuration::seconds(35);
        f.store
            .create_task(&task(
                "t-interval",
                Schedule::Interval { every_ms: 60_000 },
                &anchor.to_rfc3339(),
                ContextMode::Group,
            ))
            .unwrap();

        f.scheduler.tick().await;
        wait_until(|| f.mock_channel.sent_to("123@mock") == 1).await;

        wait_until(|| {
            f.store
                .get_task("t-interval")
                .unwrap()
                .unwrap()
                .last_run
                .is_some()
        })
        .await;
        let after = f.store.get_task("t-interval").unwrap().unwrap();
        assert_eq!(
            after.next_run.as_deref(),
            Some((anchor + ChronoDuration::seconds(60)).to_rfc3339().as_str())
        );
        assert_eq!(after.status, TaskStatus::Active);
        assert_eq!(after.last_result.as_deref(), Some("briefing ready"));

        let prompts = f.mock_runtime.prompts();
        assert!(prompts[0].text.contains("SCHEDULED TASK"));
        assert!(prompts[0].text.contains("morning briefing"));
    }

    #[tokio::test]
    async fn once_task_completes_and_never_refires() {
        let f = fixture();
        f.mock_runtime.script(ScriptedReply::Text("done".to_string()));

        let at = Utc::now() - ChronoDuration::seconds(1);
        f.store
            .create_task(&task(
                "t-once",
                Schedule::Once { at },
                &at.to_rfc3339(),
                ContextMode::Isolated,
            ))
            .unwrap();

        f.scheduler.tick().await;
        wait_until(|| {
            f.store.get_task("t-once").unwrap().unwrap().status == TaskStatus::Completed
        })
        .await;
        let after = f.store.get_task("t-once").unwrap().unwrap();
        assert!(after.next_run.is_none());

        // A later tick finds nothing due.
        f.scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.mock_channel.sent_to("123@mock"), 1);
    }

    #[tokio::test]
    async fn group_mode_persists_the_session_binding() {
        let f = fixture();
        f.mock_runtime.script(ScriptedReply::Text("hi".to_string()));

        let at = Utc::now() - ChronoDuration::seconds(1);
        f.store
            .create_task(&task(
                "t-group",
                Schedule::Interval { every_ms: 60_000 },
                &at.to_rfc3339(),
                ContextMode::Group,
            ))
            .unwrap();

        f.scheduler.tick().await;
        wait_until(|| f.store.get_session("family").unwrap().is_some()).await;
    }

    #[tokio::test]
    async fn isolated_mode_leaves_the_chat_session_alone() {
        let f = fixture();
        f.mock_runtime.script(ScriptedReply::Text("hi".to_string()));

        let at = Utc::now() - ChronoDuration::seconds(1);
        f.store
            .create_task(&task(
                "t-iso",
                Schedule::Interval { every_ms: 60_000 },
                &at.to_rfc3339(),
                ContextMode::Isolated,
            ))
            .unwrap();

        f.scheduler.tick().await;
        wait_until(|| f.mock_channel.sent_to("123@mock") == 1).await;
        assert!(f.store.get_session("family").unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_chat_records_an_error_without_advancing() {
        let f = fixture();
        let at = Utc::now() - ChronoDuration::seconds(1);
        let mut orphan = task(
            "t-orphan",
            Schedule::Interval { every_ms: 60_000 },
            &at.to_rfc3339(),
            ContextMode::Group,
        );
        orphan.chat_folder = "nobody".to_string();
        f.store.create_task(&orphan).unwrap();

        f.scheduler.tick().await;
        wait_until(|| {
            f.store
                .get_task("t-orphan")
                .unwrap()
                .unwrap()
                .last_result
                .is_some()
        })
        .await;
        let after = f.store.get_task("t-orphan").unwrap().unwrap();
        assert!(after.last_result.unwrap().contains("not registered"));
        assert_eq!(after.next_run.as_deref(), Some(at.to_rfc3339().as_str()));
    }

    #[tokio::test]
    async fn paused_between_snapshot_and_enqueue_is_skipped() {
        let f = fixture();
        let at = Utc::now() - ChronoDuration::seconds(1);
        let mut paused = task(
            "t-paused",
            Schedule::Interval { every_ms: 60_000 },
            &at.to_rfc3339(),
            ContextMode::Group,
        );
        paused.status = TaskStatus::Paused;
        f.store.create_task(&paused).unwrap();

        f.scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.mock_channel.sent_to("123@mock"), 0);
    }

    #[tokio::test]
    async fn prompt_failure_is_recorded_and_schedule_advances() {
        let f = fixture();
        f.mock_runtime
            .script(ScriptedReply::PromptFailure("runtime down".to_string()));

        let anchor = Utc::now() - ChronoDuration::seconds(5);
        f.store
            .create_task(&task(
                "t-fail",
                Schedule::Interval { every_ms: 60_000 },
                &anchor.to_rfc3339(),
                ContextMode::Group,
            ))
            .unwrap();

        f.scheduler.tick().await;
        wait_until(|| {
            f.store
                .get_task("t-fail")
                .unwrap()
                .unwrap()
                .last_result
                .is_some()
        })
        .await;
        let after = f.store.get_task("t-fail").unwrap().unwrap();
        assert!(after.last_result.unwrap().starts_with("error:"));
        // The task re-attempts at its next scheduled time.
        assert_eq!(
            after.next_run.as_deref(),
            Some((anchor + ChronoDuration::seconds(60)).to_rfc3339().as_str())
        );
        assert_eq!(f.mock_channel.sent_to("123@mock"), 0);
    }
}
