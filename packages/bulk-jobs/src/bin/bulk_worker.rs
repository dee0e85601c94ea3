//! Bulk Generation Worker
//!
//! Runs the worker pool and lease reclaimer until Ctrl+C. Uses PostgreSQL when
//! `DATABASE_URL` is set (and the `postgres` feature is enabled), otherwise an
//! in-memory store.

use std::sync::Arc;

use anyhow::{Context, Result};
use bulk_jobs::{
    EngineConfig, HttpGenerator, JobStore, LeaseReclaimer, MemoryStore, ServiceHost, WorkerConfig,
    WorkerPool,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bulk_jobs=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting bulk generation worker");

    let config = EngineConfig::from_env().context("Failed to load configuration")?;

    let generator_url = config
        .generator_url
        .clone()
        .context("GENERATOR_URL must be set")?;
    let generator = Arc::new(HttpGenerator::new(
        generator_url,
        config.generator_token.clone(),
    ));
    tracing::info!(endpoint = %generator.endpoint(), "generation service configured");

    #[cfg(feature = "postgres")]
    if let Some(database_url) = config.database_url.clone() {
        let store = bulk_jobs::PostgresStore::new(&database_url)
            .await
            .context("Failed to connect to database")?;
        tracing::info!("using PostgreSQL job store");
        return run(Arc::new(store), generator, &config).await;
    }

    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the postgres feature is disabled");
    }
    tracing::warn!("using in-memory job store; jobs are lost on restart");
    run(Arc::new(MemoryStore::new()), generator, &config).await
}

async fn run<S: JobStore + 'static>(
    store: Arc<S>,
    generator: Arc<HttpGenerator>,
    config: &EngineConfig,
) -> Result<()> {
    let pool = WorkerPool::new(store.clone(), generator, WorkerConfig::from_engine(config));
    let reclaimer = LeaseReclaimer::new(store, config.reclaim_interval);

    ServiceHost::new()
        .with_service(pool)
        .with_service(reclaimer)
        .run_until_shutdown()
        .await
}
