// Main entry point for the API server (with an optional embedded worker pool)

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::domains::jobs::{JobService, JobServiceConfig};
use server_core::kernel::jobs::{
    JobStore, PostgresJobStore, SleepHandler, WorkerPool, WorkerPoolConfig,
};
use server_core::kernel::{Admission, EventBus};
use server_core::server::{build_app, AppState};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting job queue API");

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool));
    let admission = Arc::new(Admission::new());
    let bus = EventBus::new();
    let service = Arc::new(JobService::new(
        store.clone(),
        admission.clone(),
        bus.clone(),
        JobServiceConfig::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            shutdown.cancel();
        });
    }

    // Embedded worker pool; run the dedicated `worker` binary instead by
    // setting WORKER_POOL_SIZE=0 here
    let pool_handle = if config.worker_pool_size > 0 {
        let worker_pool = WorkerPool::new(
            store.clone(),
            Arc::new(SleepHandler::default()),
            admission.clone(),
            bus.clone(),
            WorkerPoolConfig::from_config(&config),
        );
        Some(tokio::spawn(worker_pool.run(shutdown.clone())))
    } else {
        None
    };

    let app = build_app(AppState {
        store,
        service,
        bus,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await
        .context("Server error")?;

    if let Some(handle) = pool_handle {
        handle.await.context("worker pool panicked")??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
