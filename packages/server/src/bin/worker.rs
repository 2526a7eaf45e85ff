// Standalone worker-pool process. Shares the database with the API
// server; any number of these can run side by side.

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::jobs::{
    JobStore, PostgresJobStore, SleepHandler, WorkerPool, WorkerPoolConfig,
};
use server_core::kernel::{Admission, EventBus};
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

    tracing::info!("Starting worker pool");

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool));
    let admission = Arc::new(Admission::new());
    let bus = EventBus::new();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            shutdown.cancel();
        });
    }

    let worker_pool = WorkerPool::new(
        store,
        Arc::new(SleepHandler::default()),
        admission,
        bus,
        WorkerPoolConfig::from_config(&config),
    );
    worker_pool.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
