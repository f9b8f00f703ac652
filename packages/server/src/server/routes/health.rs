use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;

use crate::kernel::jobs::QueueDepth;
use crate::server::app::AppState;

const DB_PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_pool: Option<ConnectionPoolHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<QueueDepth>,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DatabaseHealth {
    fn ok() -> Self {
        Self {
            status: "ok",
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error",
            error: Some(message),
        }
    }

    fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Serialize)]
pub struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
    max_connections: u32,
}

impl From<&PgPool> for ConnectionPoolHealth {
    fn from(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle_connections: pool.num_idle(),
            max_connections: pool.options().get_max_connections(),
        }
    }
}

async fn ping(pool: &PgPool) -> DatabaseHealth {
    match tokio::time::timeout(DB_PING_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => DatabaseHealth::ok(),
        Ok(Err(e)) => DatabaseHealth::error(format!("Query failed: {}", e)),
        Err(_) => DatabaseHealth::error(format!("Query timeout (>{}s)", DB_PING_TIMEOUT.as_secs())),
    }
}

/// Health check endpoint
///
/// Pings the database, reports pool usage and the crawl queue depth per
/// status. 200 when the database answers, 503 otherwise. An in-memory store
/// has no pool and is always reachable.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db_pool {
        Some(pool) => ping(pool).await,
        None => DatabaseHealth::ok(),
    };

    if !database.is_ok() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                database,
                connection_pool: state.db_pool.as_ref().map(ConnectionPoolHealth::from),
                queue: None,
            }),
        );
    }

    let queue = state
        .store
        .queue_depth()
        .await
        .map_err(|e| tracing::warn!(error = %e, "failed to read crawl queue depth"))
        .ok();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            database,
            connection_pool: state.db_pool.as_ref().map(ConnectionPoolHealth::from),
            queue,
        }),
    )
}
