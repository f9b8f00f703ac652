// Main entry point for the crawl job server

use std::sync::Arc;

use anyhow::{Context, Result};
use crawl_core::domains::crawling::TickRunner;
use crawl_core::kernel::jobs::{CrawlJobStore, PostgresCrawlJobStore, WorkerInfo};
use crawl_core::kernel::scheduled_tasks::start_scheduler;
use crawl_core::kernel::HttpExtractionPipeline;
use crawl_core::server::{build_app, AppState};
use crawl_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crawl_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting brand crawl job server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let cron_secret = config
        .cron_secret
        .clone()
        .context("CRON_SECRET must be set")?;
    tracing::info!(
        worker_id = %config.worker_id,
        stale_threshold_secs = config.queue.stale_threshold.as_secs(),
        max_claim_batch = config.queue.max_claim_batch,
        stale_policy = ?config.queue.stale_policy,
        "Configuration loaded"
    );

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let store: Arc<dyn CrawlJobStore> = Arc::new(PostgresCrawlJobStore::new(pool.clone()));
    let pipeline = Arc::new(
        HttpExtractionPipeline::new(&config.extraction_service_url, config.extraction_timeout)
            .context("Failed to create extraction pipeline")?,
    );
    let tick = Arc::new(TickRunner::new(
        store,
        pipeline,
        &config.queue,
        WorkerInfo::current(config.worker_id.clone()),
    ));

    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = if config.in_process_scheduler {
        Some(
            start_scheduler(tick.clone(), &config.tick_cron)
                .await
                .context("Failed to start in-process scheduler")?,
        )
    } else {
        None
    };

    let state = AppState::new(tick, config.queue.clone(), cron_secret).with_db_pool(pool);
    let app = build_app(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
