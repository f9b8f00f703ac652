//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::config::QueueConfig;
use crate::domains::crawling::TickRunner;
use crate::kernel::jobs::CrawlJobStore;
use crate::server::routes::{
    crawl_status_handler, health_handler, process_jobs_handler, start_crawl_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CrawlJobStore>,
    pub tick: Arc<TickRunner>,
    pub queue: QueueConfig,
    pub cron_secret: Arc<str>,
    /// Set when backed by PostgreSQL; `/health` pings it.
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn new(tick: Arc<TickRunner>, queue: QueueConfig, cron_secret: impl Into<Arc<str>>) -> Self {
        Self {
            store: tick.store().clone(),
            tick,
            queue,
            cron_secret: cron_secret.into(),
            db_pool: None,
        }
    }

    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/crawl/start", post(start_crawl_handler))
        .route("/api/crawl/status/:id", get(crawl_status_handler))
        .route("/api/crawl/process-jobs", post(process_jobs_handler))
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
