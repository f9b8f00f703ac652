//! Crawl job endpoints: start, poll and the cron trigger.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::CrawlJobId;
use crate::domains::crawling::actions::{
    crawl_status, enqueue_crawl, poll_url, CrawlJobStatusView, StartCrawlRequest,
};
use crate::kernel::jobs::CrawlJobStatus;
use crate::server::app::AppState;
use crate::server::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCrawlResponse {
    pub run_id: CrawlJobId,
    pub status: CrawlJobStatus,
    pub poll_url: String,
}

/// `POST /api/crawl/start`
///
/// 201 for a new job, 200 when an in-flight job for the same brand and url
/// is reused.
pub async fn start_crawl_handler(
    Extension(state): Extension<AppState>,
    payload: Result<Json<StartCrawlRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartCrawlResponse>), ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let result = enqueue_crawl(state.store.as_ref(), &request, state.queue.enqueue_cooldown).await?;
    let status = if result.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let job = result.job();

    Ok((
        status,
        Json(StartCrawlResponse {
            run_id: job.id,
            status: job.status(),
            poll_url: poll_url(job.id),
        }),
    ))
}

/// `GET /api/crawl/status/:id`
pub async fn crawl_status_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CrawlJobStatusView>, ApiError> {
    let id = CrawlJobId::parse(&id)
        .map_err(|_| ApiError::BadRequest("id must be a uuid".to_string()))?;

    Ok(Json(crawl_status(state.store.as_ref(), id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessJobsQuery {
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessJobsResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub requeued: usize,
    pub reaped: usize,
}

/// `POST /api/crawl/process-jobs?secret=...`
///
/// Runs one tick. The tick runs on its own task so a caller that disconnects
/// mid-batch does not cancel in-flight jobs.
pub async fn process_jobs_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<ProcessJobsQuery>,
    headers: HeaderMap,
) -> Result<Json<ProcessJobsResponse>, ApiError> {
    let provided = query.secret.or_else(|| bearer_token(&headers));
    if !secret_matches(provided.as_deref(), &state.cron_secret) {
        tracing::warn!("rejected crawl trigger with missing or invalid secret");
        return Err(ApiError::Forbidden);
    }

    let tick = state.tick.clone();
    let summary = tokio::spawn(async move { tick.tick().await })
        .await
        .map_err(|e| ApiError::Internal(format!("crawl tick task failed: {e}")))??;

    let reap = summary.reap.unwrap_or_default();
    Ok(Json(ProcessJobsResponse {
        success: true,
        message: summary.message(),
        timestamp: summary.timestamp,
        claimed: summary.process.claimed,
        completed: summary.process.completed,
        failed: summary.process.failed,
        abandoned: summary.process.abandoned,
        requeued: reap.requeued,
        reaped: reap.reaped(),
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Compares digests so the comparison time does not depend on the secret's prefix.
fn secret_matches(provided: Option<&str>, expected: &str) -> bool {
    match provided {
        Some(provided) if !expected.is_empty() => {
            Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn secret_must_match_exactly() {
        assert!(secret_matches(Some("s3cret"), "s3cret"));
        assert!(!secret_matches(Some("s3cre"), "s3cret"));
        assert!(!secret_matches(None, "s3cret"));
    }

    #[test]
    fn empty_configured_secret_rejects_everything() {
        assert!(!secret_matches(Some(""), ""));
    }

    #[test]
    fn reads_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("s3cret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
