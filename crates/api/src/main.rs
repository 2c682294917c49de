use anyhow::{Context, Result};
use domain::services::{SharedClock, SystemClock};
use persistence::repositories::{ChartRepository, FilterPreferenceRepository};
use persistence::PgExportStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use revenue_dashboard_api::app::{self, AppState, Backends};
use revenue_dashboard_api::config::Config;
use revenue_dashboard_api::jobs::{
    CacheSweepJob, DownloadTokenCleanupJob, FilterSessionEvictionJob, JobScheduler,
    RuntimeMetricsJob,
};
use revenue_dashboard_api::middleware::{init_logging, init_metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.logging);
    init_metrics().context("Failed to install Prometheus recorder")?;

    info!("Starting Revenue Dashboard API v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.database.pool_config())
        .await
        .context("Failed to connect to database")?;

    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    tokio::fs::create_dir_all(&config.downloads.export_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create export directory {}",
                config.downloads.export_dir.display()
            )
        })?;

    let clock: SharedClock = Arc::new(SystemClock);
    let backends = Backends {
        exports: Arc::new(PgExportStore::new(pool.clone())),
        preferences: Arc::new(FilterPreferenceRepository::new(pool.clone())),
        source: Arc::new(ChartRepository::new(pool.clone(), clock.clone())),
        clock,
        pool: Some(pool.clone()),
    };
    let state = AppState::new(config.clone(), backends);

    let mut scheduler = JobScheduler::new();
    scheduler.register(CacheSweepJob::new(
        state.coordinator.cache().clone(),
        config.cache.cleanup_interval_secs,
    ));
    scheduler.register(DownloadTokenCleanupJob::new(state.ledger.clone()));
    if let Some(max_idle) = config.filters.session_idle() {
        scheduler.register(FilterSessionEvictionJob::new(state.filters.clone(), max_idle));
    }
    scheduler.register(RuntimeMetricsJob::new(&state));
    scheduler.start();

    let app = app::create_app(state);

    let addr = config.socket_addr().context("Invalid server address")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
