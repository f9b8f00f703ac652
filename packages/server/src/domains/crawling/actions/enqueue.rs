//! Start-crawl action: validate, normalize and insert (or reuse) a job.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::common::{BrandId, CrawlJobId, WorkspaceId};
use crate::kernel::jobs::{CrawlJob, CrawlJobError, CrawlJobStore, NewCrawlJob, Result};

const MAX_URL_LEN: usize = 2048;

/// Body of `POST /api/crawl/start`.
///
/// Fields are optional so a missing field is reported as a validation error
/// rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartCrawlRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

/// Result of an enqueue that handles in-flight duplicates.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// A new pending job was inserted
    Created(CrawlJob),
    /// A job for the same brand and url is already in flight
    Duplicate(CrawlJob),
}

impl EnqueueResult {
    pub fn job(&self) -> &CrawlJob {
        match self {
            EnqueueResult::Created(job) | EnqueueResult::Duplicate(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Path a client polls for this job's status.
pub fn poll_url(id: CrawlJobId) -> String {
    format!("/api/crawl/status/{}", id)
}

/// Parse an absolute http(s) url and return its canonical form.
///
/// Scheme and host are lower-cased by the parser; the fragment is dropped.
pub fn normalize_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CrawlJobError::Validation("url is required".into()));
    }
    if raw.len() > MAX_URL_LEN {
        return Err(CrawlJobError::Validation(format!(
            "url must be at most {MAX_URL_LEN} characters"
        )));
    }

    let mut url = url::Url::parse(raw)
        .map_err(|e| CrawlJobError::Validation(format!("url is not valid: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CrawlJobError::Validation(
            "url must use http or https".into(),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(CrawlJobError::Validation("url must include a host".into()));
    }

    url.set_fragment(None);
    Ok(url.to_string())
}

fn parse_id<T>(field: &str, value: Option<&str>) -> Result<crate::common::Id<T>> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CrawlJobError::Validation(format!("{field} is required")))?;

    crate::common::Id::parse(value)
        .map_err(|_| CrawlJobError::Validation(format!("{field} must be a uuid")))
}

/// Validate a start request into an insertable job.
pub fn validate(request: &StartCrawlRequest) -> Result<NewCrawlJob> {
    let url = normalize_url(request.url.as_deref().unwrap_or_default())?;
    let brand_id: BrandId = parse_id("brand_id", request.brand_id.as_deref())?;
    let workspace_id: WorkspaceId = parse_id("workspace_id", request.workspace_id.as_deref())?;

    Ok(NewCrawlJob::builder()
        .brand_id(brand_id)
        .workspace_id(workspace_id)
        .url(url)
        .build())
}

/// Enqueue a crawl, reusing an in-flight job for the same brand and url.
pub async fn enqueue_crawl(
    store: &dyn CrawlJobStore,
    request: &StartCrawlRequest,
    cooldown: Duration,
) -> Result<EnqueueResult> {
    let new_job = validate(request)?;

    match store.insert(new_job, cooldown).await {
        Ok(job) => {
            info!(job_id = %job.id, brand_id = %job.brand_id, url = %job.url, "crawl job enqueued");
            Ok(EnqueueResult::Created(job))
        }
        Err(CrawlJobError::Duplicate { existing }) => {
            info!(job_id = %existing.id, brand_id = %existing.brand_id, "crawl already in flight, reusing job");
            Ok(EnqueueResult::Duplicate(*existing))
        }
        Err(e) => Err(e),
    }
}
