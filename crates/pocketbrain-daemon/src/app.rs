//! Composition root: one `run` builds the whole control plane, wires
//! the pieces together, and unwinds them in reverse order on ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::info;

use pocketbrain_agent::http::HttpAgentRuntime;
use pocketbrain_agent::mock::MockAgentRuntime;
use pocketbrain_agent::AgentRuntime;
use pocketbrain_channels::mock::MockChannel;
use pocketbrain_channels::ChannelRouter;
use pocketbrain_core::PocketBrainConfig;
use pocketbrain_ipc::IpcWatcher;
use pocketbrain_orchestrator::{Orchestrator, OrchestratorSettings};
use pocketbrain_queue::{ChatQueue, QueueSettings};
use pocketbrain_scheduler::schedule::parse_timezone;
use pocketbrain_scheduler::{Scheduler, TaskDeps};
use pocketbrain_sessions::{SessionManager, SessionTimeouts};
use pocketbrain_store::Store;

/// Inbound channel-event queue depth. Adapters block (briefly) when the
/// orchestrator falls this far behind; nothing is dropped.
const EVENT_QUEUE_DEPTH: usize = 256;

pub async fn run(config: PocketBrainConfig) -> anyhow::Result<()> {
    // Fatal startup pieces first: a process that cannot persist or
    // cannot compute schedules refuses to run.
    let store = Arc::new(
        Store::open(config.db_path())
            .with_context(|| format!("opening database at {}", config.db_path()))?,
    );
    let timezone = parse_timezone(&config.timezone)
        .with_context(|| format!("parsing timezone {}", config.timezone))?;

    let runtime: Arc<dyn AgentRuntime> = match config.agent.mode.as_str() {
        "http" => Arc::new(HttpAgentRuntime::connect(&config.agent.base_url)),
        "mock" => {
            info!("using the mock agent runtime (dev mode)");
            Arc::new(MockAgentRuntime::new())
        }
        other => anyhow::bail!("unknown agent runtime mode: {other}"),
    };

    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&runtime),
        SessionTimeouts {
            init: Duration::from_secs(config.session.init_timeout_secs),
            stream: Duration::from_secs(config.session.stream_timeout_secs),
            finalize: Duration::from_secs(config.session.finalize_timeout_secs),
        },
    ));
    let queue = Arc::new(ChatQueue::new(
        Arc::clone(&sessions),
        QueueSettings {
            max_concurrent: config.queue.max_concurrent,
            max_retries: config.queue.max_retries,
            retry_base_ms: config.queue.retry_base_ms,
        },
    ));

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let mut router = ChannelRouter::new(Arc::clone(&store));
    if config.channels.mock.as_ref().is_some_and(|m| m.enabled) {
        let channel = Arc::new(MockChannel::new("mock", "@mock"));
        channel.attach_events(events_tx.clone());
        router.register(channel);
    }
    let router = Arc::new(router);

    let idle_timeout = Duration::from_secs(config.session.idle_timeout_secs);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&sessions),
        Arc::clone(&router),
        OrchestratorSettings {
            tick_interval: Duration::from_secs(config.orchestrator.tick_interval_secs),
            idle_timeout,
            instructions_dir: PathBuf::from(format!("{}/instructions", config.data_dir)),
        },
    ));
    queue.set_batch_handler(orchestrator.clone());

    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::new(TaskDeps {
            store: Arc::clone(&store),
            sessions: Arc::clone(&sessions),
            router: Arc::clone(&router),
            timezone,
            idle_timeout,
        }),
        Duration::from_secs(config.scheduler.tick_interval_secs),
    );

    let ipc = IpcWatcher::new(
        config.ipc_root(),
        Arc::clone(&store),
        Arc::clone(&router),
        timezone,
        Duration::from_secs(config.ipc.poll_interval_secs),
    );
    ipc.startup_cleanup();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    router.connect_all().await;
    orchestrator.recover();

    let mut loops = Vec::new();
    loops.push(tokio::spawn(
        orchestrator.clone().run(events_rx, shutdown_rx.clone()),
    ));
    loops.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    loops.push(tokio::spawn(ipc.run(shutdown_rx.clone())));
    loops.push(tokio::spawn(
        Arc::clone(&router).run_outbox_pump(shutdown_rx.clone()),
    ));

    info!(data_dir = %config.data_dir, "pocketbrain running");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");

    // Reverse order of construction: stop admitting, drain, disconnect,
    // and let the store drop last.
    shutdown_tx.send(true)?;
    queue
        .shutdown(Duration::from_secs(config.queue.shutdown_grace_secs))
        .await;
    router.disconnect_all().await;
    for handle in loops {
        let _ = handle.await;
    }
    info!("goodbye");
    Ok(())
}
