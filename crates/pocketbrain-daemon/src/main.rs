use tracing::warn;

mod app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("POCKETBRAIN_LOG")
                .unwrap_or_else(|_| "pocketbrain=info,pocketbrain_daemon=info".into()),
        )
        .init();

    // load config: POCKETBRAIN_CONFIG env > ~/.pocketbrain/pocketbrain.toml
    let config_path = std::env::var("POCKETBRAIN_CONFIG").ok();
    let config = pocketbrain_core::PocketBrainConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            warn!("config load failed ({e}), using defaults");
            pocketbrain_core::PocketBrainConfig::default()
        });

    app::run(config).await
}
