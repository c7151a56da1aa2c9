use std::sync::Arc;

use mediabot_core::fs_paths::ServerPaths;
use mediabot_core::models::settings::PipelineSettings;
use tracing_subscriber::EnvFilter;

pub mod bot;
pub mod core;
pub mod platforms;
pub mod storage;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub store: Arc<dyn storage::store::SettingsStore>,
    pub proxies: Arc<core::proxy_pool::ProxyPool>,
    pub registry: Arc<core::registry::PlatformRegistry>,
    pub gate: core::gate::ConcurrencyGate,
    pub delivery: core::delivery::DeliveryOrchestrator,
    pub transport: Arc<dyn bot::transport::ChatTransport>,
    pub settings: PipelineSettings,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn run() -> anyhow::Result<()> {
    init_tracing();

    let paths = Arc::new(ServerPaths::from_env());
    tracing::info!("using base directory {}", paths.base().display());
    let config = storage::config::load_config(paths.as_ref())?;

    let workers = Arc::new(core::gate::WorkerPool::new(config.pipeline.worker_threads)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(bot::serve(paths, config, workers))
}
