//! filemesh storage node entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting filemesh storage node"
    );

    let config = config::Config::load()?;
    tracing::info!(
        port = config.listen_port,
        storage = %config.storage_path.display(),
        coordinator = %config.coordinator_address,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("storage node shut down cleanly");
    Ok(())
}
