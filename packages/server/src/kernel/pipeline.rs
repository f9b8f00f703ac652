//! Brand extraction pipeline boundary.
//!
//! The scraping and extraction work itself lives outside this service. The
//! processor only needs something it can await that reports progress along
//! the way and yields a brand kit as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::common::{BrandId, CrawlJobId, WorkspaceId};
use crate::kernel::jobs::CrawlJob;

/// Input handed to the pipeline for one claimed job.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlRequest {
    pub job_id: CrawlJobId,
    pub brand_id: BrandId,
    pub workspace_id: WorkspaceId,
    pub url: String,
}

impl From<&CrawlJob> for CrawlRequest {
    fn from(job: &CrawlJob) -> Self {
        Self {
            job_id: job.id,
            brand_id: job.brand_id,
            workspace_id: job.workspace_id,
            url: job.url.clone(),
        }
    }
}

/// Progress sink passed into the pipeline.
///
/// Values are clamped to 100 and never go backwards; lower reports are dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<u8>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn report(&self, progress: u8) {
        let progress = progress.min(100);
        self.tx.send_if_modified(|current| {
            if progress > *current {
                *current = progress;
                true
            } else {
                false
            }
        });
    }

    pub fn current(&self) -> u8 {
        *self.tx.borrow()
    }
}

#[async_trait]
pub trait BrandExtractionPipeline: Send + Sync {
    async fn extract(
        &self,
        request: &CrawlRequest,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value>;
}

/// Calls an external brand extraction service over HTTP.
pub struct HttpExtractionPipeline {
    client: reqwest::Client,
    endpoint: url::Url,
}

/// Longest error body kept in a job's error message.
const MAX_ERROR_BODY: usize = 500;

impl HttpExtractionPipeline {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .with_context(|| format!("invalid extraction service url: {endpoint}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build extraction http client")?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl BrandExtractionPipeline for HttpExtractionPipeline {
    async fn extract(
        &self,
        request: &CrawlRequest,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value> {
        progress.report(10);
        debug!(job_id = %request.job_id, endpoint = %self.endpoint, "dispatching brand extraction");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .context("extraction service request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(anyhow!("extraction service returned {}: {}", status, body));
        }

        progress.report(90);

        response
            .json::<serde_json::Value>()
            .await
            .context("extraction service returned invalid json")
    }
}
