use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (pocketbrain.toml + POCKETBRAIN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocketBrainConfig {
    /// Root directory for the SQLite database and the IPC tree.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// IANA timezone name used for cron evaluation (e.g. "Europe/Bucharest").
    /// The host timezone is deliberately never consulted.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Default for PocketBrainConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            timezone: default_timezone(),
            orchestrator: OrchestratorConfig::default(),
            scheduler: SchedulerConfig::default(),
            ipc: IpcConfig::default(),
            queue: QueueConfig::default(),
            session: SessionConfig::default(),
            agent: AgentConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Inbound tick cadence in seconds.
    #[serde(default = "default_orchestrator_tick")]
    pub tick_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_orchestrator_tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Due-task poll cadence in seconds.
    #[serde(default = "default_scheduler_tick")]
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_scheduler_tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// IPC directory scan cadence in seconds.
    #[serde(default = "default_ipc_tick")]
    pub poll_interval_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_ipc_tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Global ceiling on simultaneously held session slots.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Retry attempts for a failed message batch before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles per attempt (5s → 10s → 20s → …).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Grace period for in-flight slots during shutdown, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Abort an open session after this long without result-bearing output.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Bound on `get_session` / `create_session` during session resolution.
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,

    /// Bound on waiting for the event stream to deliver a prompt's result.
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,

    /// Bound on the canonical `get_message` fetch after the stream ends.
    #[serde(default = "default_finalize_timeout")]
    pub finalize_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            init_timeout_secs: default_init_timeout(),
            stream_timeout_secs: default_stream_timeout(),
            finalize_timeout_secs: default_finalize_timeout(),
        }
    }
}

/// How the daemon reaches the LLM-agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// "http" for a running agent server, "mock" for offline development.
    #[serde(default = "default_agent_mode")]
    pub mode: String,

    /// Base URL of the agent server (http mode).
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: default_agent_mode(),
            base_url: default_agent_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub mock: Option<MockChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockChannelConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}

fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.pocketbrain")
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_orchestrator_tick() -> u64 {
    2
}
fn default_scheduler_tick() -> u64 {
    60
}
fn default_ipc_tick() -> u64 {
    1
}
fn default_max_concurrent() -> usize {
    3
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    5_000
}
fn default_shutdown_grace() -> u64 {
    20
}
fn default_idle_timeout() -> u64 {
    30 * 60
}
fn default_init_timeout() -> u64 {
    15
}
fn default_stream_timeout() -> u64 {
    120
}
fn default_finalize_timeout() -> u64 {
    30
}
fn default_agent_mode() -> String {
    "http".to_string()
}
fn default_agent_base_url() -> String {
    "http://127.0.0.1:4096".to_string()
}

impl PocketBrainConfig {
    /// Load config from a TOML file with POCKETBRAIN_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.pocketbrain/pocketbrain.toml
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `POCKETBRAIN_QUEUE__MAX_CONCURRENT=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PocketBrainConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("POCKETBRAIN_").split("__"))
            .extract()
            .map_err(|e| crate::error::PocketBrainError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Path of the SQLite database file under `data_dir`.
    pub fn db_path(&self) -> String {
        format!("{}/pocketbrain.db", self.data_dir)
    }

    /// Root of the file-IPC tree under `data_dir`.
    pub fn ipc_root(&self) -> String {
        format!("{}/ipc", self.data_dir)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.pocketbrain/pocketbrain.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_cadences() {
        let config = PocketBrainConfig::default();
        assert_eq!(config.orchestrator.tick_interval_secs, 2);
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.ipc.poll_interval_secs, 1);
        assert_eq!(config.session.idle_timeout_secs, 1800);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.retry_base_ms, 5_000);
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let mut config = PocketBrainConfig::default();
        config.data_dir = "/tmp/pb".to_string();
        assert_eq!(config.db_path(), "/tmp/pb/pocketbrain.db");
        assert_eq!(config.ipc_root(), "/tmp/pb/ipc");
    }
}
