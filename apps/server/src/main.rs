//! formrelay server entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting formrelay");

    let config = config::Config::load()?;
    tracing::info!(
        addr = %config.listen_addr(),
        rate_limit = ?config.rate_limit_bytes_per_second,
        "configuration loaded"
    );

    // All jobs are cooperative tasks on one thread.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(app::run(config))?;

    tracing::info!("formrelay shut down cleanly");
    Ok(())
}
