//! CLI for running the crawl tick by hand
//!
//! Useful when no cron is wired up, or to drain the queue from a shell.
//! Every command prints one JSON object to stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawl_core::common::CrawlJobId;
use crawl_core::config::{database_url_from_env, Config, QueueConfig};
use crawl_core::domains::crawling::actions::crawl_status;
use crawl_core::domains::crawling::{ReaperConfig, StaleJobReaper, TickRunner};
use crawl_core::kernel::jobs::{CrawlJobStore, PostgresCrawlJobStore, WorkerInfo};
use crawl_core::kernel::HttpExtractionPipeline;
use serde::Serialize;
use sqlx::PgPool;

#[derive(Parser)]
#[command(name = "crawl_tick")]
#[command(about = "Run crawl queue maintenance from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reap stale jobs, then claim and process one batch
    Tick,

    /// Reap stale jobs only
    Reap,

    /// Show a job's status
    Status { id: String },
}

#[derive(Serialize)]
struct Response<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn output<T: Serialize>(resp: Response<T>) -> Result<()> {
    println!("{}", serde_json::to_string(&resp)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,crawl_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Only `tick` runs the pipeline and needs the full configuration.
    match cli.command {
        Commands::Tick => {
            let config = Config::from_env()?;
            let pool = connect(&config.database_url).await?;
            cmd_tick(&config, pool).await
        }
        Commands::Reap => {
            let pool = connect(&database_url_from_env()?).await?;
            cmd_reap(&QueueConfig::from_env()?, pool).await
        }
        Commands::Status { id } => {
            let pool = connect(&database_url_from_env()?).await?;
            cmd_status(pool, &id).await
        }
    }
}

async fn connect(database_url: &str) -> Result<PgPool> {
    PgPool::connect(database_url)
        .await
        .context("Failed to connect to database")
}

fn tick_runner(config: &Config, pool: PgPool) -> Result<TickRunner> {
    let store: Arc<dyn CrawlJobStore> = Arc::new(PostgresCrawlJobStore::new(pool));
    let pipeline = Arc::new(HttpExtractionPipeline::new(
        &config.extraction_service_url,
        config.extraction_timeout,
    )?);
    Ok(TickRunner::new(
        store,
        pipeline,
        &config.queue,
        WorkerInfo::current(config.worker_id.clone()),
    ))
}

async fn cmd_tick(config: &Config, pool: PgPool) -> Result<()> {
    let summary = tick_runner(config, pool)?.tick().await?;
    output(Response {
        success: true,
        message: Some(summary.message()),
        data: Some(summary),
    })
}

async fn cmd_reap(queue: &QueueConfig, pool: PgPool) -> Result<()> {
    let store = PostgresCrawlJobStore::new(pool);
    let summary = StaleJobReaper::new(&store, ReaperConfig::from(queue))
        .run_once()
        .await?;
    output(Response {
        success: true,
        message: Some(format!(
            "Reaped {} of {} stale job(s)",
            summary.reaped(),
            summary.scanned
        )),
        data: Some(summary),
    })
}

async fn cmd_status(pool: PgPool, id: &str) -> Result<()> {
    let id = CrawlJobId::parse(id).context("id must be a uuid")?;
    let store = PostgresCrawlJobStore::new(pool);

    match crawl_status(&store, id).await {
        Ok(view) => output(Response {
            success: true,
            message: None,
            data: Some(view),
        }),
        Err(e) => output(Response::<()> {
            success: false,
            message: Some(e.to_string()),
            data: None,
        }),
    }
}
