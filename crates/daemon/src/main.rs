//! Newsdesk job daemon - composition root
//!
//! Wires the SQLite store into a `JobScheduler`, starts a worker pool per
//! queue and the cache-warming cadence, then waits for Ctrl+C.

mod config;
mod handlers;

use anyhow::{Context, Result};
use config::{DaemonConfig, LogFormat};
use handlers::DispatchHandler;
use newsdesk_core::application::worker::{shutdown_channel, Worker};
use newsdesk_core::domain::{JobPayload, QueueKind};
use newsdesk_core::port::id_provider::UuidProvider;
use newsdesk_core::port::time_provider::SystemTimeProvider;
use newsdesk_core::port::JobHandler;
use newsdesk_core::JobScheduler;
use newsdesk_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the global subscriber; the guard must live until exit to flush file logs
fn init_logging(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("newsdesk=info"))
        .context("Failed to create env filter")?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "newsdesk-jobs.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    match config.log_format {
        // Production: JSON structured logging
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        // Development: pretty formatting with colors
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env()?;
    let _log_guard = init_logging(&config)?;

    info!(version = VERSION, "Newsdesk job daemon starting");

    // 2. Database
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    info!(db_path = %config.db_path, "Initializing database");
    let pool = create_pool(&config.database_url()).await?;
    run_migrations(&pool).await?;

    // 3. Scheduler (runs orphan recovery before returning)
    let store = Arc::new(SqliteJobStore::new(pool));
    let scheduler = JobScheduler::start(
        config.scheduler.clone(),
        store,
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    )
    .await?;

    // 4. Recurring producers
    if let Some(cadence) = config.cache_warm_cadence.clone() {
        let id = scheduler.recurring().schedule_recurring(
            scheduler.queue(QueueKind::CacheWarming),
            JobPayload::new(serde_json::json!({ "cache": "dashboard" })),
            cadence,
        )?;
        info!(cadence_id = %id, "Cache warming cadence registered");
    }

    // 5. Worker pool
    let (worker_shutdown, token) = shutdown_channel();
    let handler: Arc<dyn JobHandler> = Arc::new(DispatchHandler);
    let mut workers = Vec::new();
    for queue in scheduler.queues() {
        for _ in 0..config.workers_per_queue {
            let worker = Worker::new(Arc::clone(queue), Arc::clone(&handler));
            let token = token.clone();
            workers.push(tokio::spawn(async move {
                if let Err(e) = worker.run(token).await {
                    error!(error = %e, "Worker failed");
                }
            }));
        }
    }
    info!(
        workers = workers.len(),
        "System ready, press Ctrl+C to shut down"
    );

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // 7. Ordered shutdown; workers finish their current job during the drain
    let report = scheduler.shutdown().await?;
    worker_shutdown.shutdown();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }

    info!(
        drained = report.drained,
        abandoned_active = report.abandoned_active,
        "Shutdown complete"
    );
    Ok(())
}
