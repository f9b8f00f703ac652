//! Read-only status projection for polling clients.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::CrawlJobId;
use crate::kernel::jobs::{CrawlJob, CrawlJobError, CrawlJobStatus, CrawlJobStore, JobState, Result};

/// What a polling client sees. Worker identity and retry bookkeeping stay internal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJobStatusView {
    pub id: CrawlJobId,
    pub status: CrawlJobStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl From<&CrawlJob> for CrawlJobStatusView {
    fn from(job: &CrawlJob) -> Self {
        let (error_message, result) = match &job.state {
            JobState::Completed { result, .. } => (None, Some(result.clone())),
            JobState::Failed { error_message, .. } => (Some(error_message.clone()), None),
            JobState::Pending { .. } | JobState::Processing { .. } => (None, None),
        };

        Self {
            id: job.id,
            status: job.status(),
            progress: job.progress,
            started_at: job.state.started_at(),
            finished_at: job.state.finished_at(),
            error_message,
            result,
        }
    }
}

pub async fn crawl_status(store: &dyn CrawlJobStore, id: CrawlJobId) -> Result<CrawlJobStatusView> {
    let job = store.find(id).await?.ok_or(CrawlJobError::NotFound(id))?;
    Ok(CrawlJobStatusView::from(&job))
}
