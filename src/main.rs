use anyhow::{Context, Result};
use dubcore::cache::TranslationCache;
use dubcore::config::Config;
use dubcore::manager::JobManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;
    let config = Arc::new(config);

    let manager = JobManager::load(
        config.static_dir.clone(),
        config.max_jobs,
        config.max_logs_per_job,
        config.job_expiration_hours,
    )
    .await
    .context("failed to load job registry")?;

    if let Ok(removed) = manager.cleanup_orphans().await {
        if removed > 0 {
            info!("removed {removed} orphaned files from static dir on startup");
        }
    }

    let cache = Arc::new(TranslationCache::new(&config.static_dir));

    let addr: SocketAddr = std::env::var("DUBCORE_BIND_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

    info!("listening on {addr}");
    let app = dubcore::server::router(manager, config, cache);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
