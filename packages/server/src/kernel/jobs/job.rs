//! Crawl job model.
//!
//! Rows are read as a flat [`CrawlJobRecord`] and converted into a
//! [`CrawlJob`] whose [`JobState`] carries only the fields that are
//! meaningful for its status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::error::CrawlJobError;
use crate::common::{BrandId, CrawlJobId, WorkspaceId};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "crawl_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CrawlJobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CrawlJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlJobStatus::Pending => "pending",
            CrawlJobStatus::Processing => "processing",
            CrawlJobStatus::Completed => "completed",
            CrawlJobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlJobStatus::Completed | CrawlJobStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, CrawlJobStatus::Pending | CrawlJobStatus::Processing)
    }
}

impl std::fmt::Display for CrawlJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Worker identity
// ============================================================================

/// Identifies the process that claimed a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub process_id: u32,
    pub hostname: String,
}

impl WorkerInfo {
    /// Describe the current process under the given worker id.
    pub fn current(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            process_id: std::process::id(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

// ============================================================================
// Typed state
// ============================================================================

/// Per-status payload of a crawl job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// `started_at` survives a requeue of a job that already ran.
    Pending {
        started_at: Option<DateTime<Utc>>,
    },
    Processing {
        started_at: DateTime<Utc>,
        worker: WorkerInfo,
    },
    Completed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        result: serde_json::Value,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        error_message: String,
    },
}

impl JobState {
    pub fn status(&self) -> CrawlJobStatus {
        match self {
            JobState::Pending { .. } => CrawlJobStatus::Pending,
            JobState::Processing { .. } => CrawlJobStatus::Processing,
            JobState::Completed { .. } => CrawlJobStatus::Completed,
            JobState::Failed { .. } => CrawlJobStatus::Failed,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::Processing { started_at, .. } | JobState::Completed { started_at, .. } => {
                Some(*started_at)
            }
            JobState::Pending { started_at } | JobState::Failed { started_at, .. } => *started_at,
        }
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::Completed { finished_at, .. } | JobState::Failed { finished_at, .. } => {
                Some(*finished_at)
            }
            _ => None,
        }
    }
}

// ============================================================================
// CrawlJob
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlJob {
    pub id: CrawlJobId,
    pub brand_id: BrandId,
    pub workspace_id: WorkspaceId,
    pub url: String,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    /// Heartbeat. Advances on every progress write.
    pub updated_at: DateTime<Utc>,
    pub retry_count: i32,
    /// Claim counter; the claimant's ownership token.
    pub attempt: i32,
    /// Current or last claimant.
    pub worker_info: Option<WorkerInfo>,
    pub state: JobState,
}

impl CrawlJob {
    pub fn status(&self) -> CrawlJobStatus {
        self.state.status()
    }
}

/// Flat row shape of the `crawl_jobs` table.
#[derive(FromRow, Debug, Clone)]
pub(crate) struct CrawlJobRecord {
    pub id: CrawlJobId,
    pub brand_id: BrandId,
    pub workspace_id: WorkspaceId,
    pub url: String,
    pub status: CrawlJobStatus,
    pub progress: i16,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub worker_info: Option<Json<WorkerInfo>>,
    pub retry_count: i32,
    pub attempt: i32,
}

impl CrawlJobRecord {
    pub(crate) fn pending(
        brand_id: BrandId,
        workspace_id: WorkspaceId,
        url: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CrawlJobId::new(),
            brand_id,
            workspace_id,
            url,
            status: CrawlJobStatus::Pending,
            progress: 0,
            error_message: None,
            result: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            worker_info: None,
            retry_count: 0,
            attempt: 0,
        }
    }
}

impl TryFrom<CrawlJobRecord> for CrawlJob {
    type Error = CrawlJobError;

    fn try_from(row: CrawlJobRecord) -> Result<Self, Self::Error> {
        let corrupt = |reason: &str| CrawlJobError::CorruptRow {
            id: row.id,
            reason: reason.to_string(),
        };

        let progress = u8::try_from(row.progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| corrupt("progress out of range"))?;

        let worker_info = row.worker_info.clone().map(|Json(info)| info);

        let state = match row.status {
            CrawlJobStatus::Pending => JobState::Pending {
                started_at: row.started_at,
            },
            CrawlJobStatus::Processing => JobState::Processing {
                started_at: row
                    .started_at
                    .ok_or_else(|| corrupt("processing without started_at"))?,
                worker: worker_info
                    .clone()
                    .ok_or_else(|| corrupt("processing without worker_info"))?,
            },
            CrawlJobStatus::Completed => JobState::Completed {
                started_at: row
                    .started_at
                    .ok_or_else(|| corrupt("completed without started_at"))?,
                finished_at: row
                    .finished_at
                    .ok_or_else(|| corrupt("completed without finished_at"))?,
                result: row
                    .result
                    .clone()
                    .ok_or_else(|| corrupt("completed without result"))?,
            },
            CrawlJobStatus::Failed => JobState::Failed {
                started_at: row.started_at,
                finished_at: row
                    .finished_at
                    .ok_or_else(|| corrupt("failed without finished_at"))?,
                error_message: row
                    .error_message
                    .clone()
                    .ok_or_else(|| corrupt("failed without error_message"))?,
            },
        };

        Ok(CrawlJob {
            id: row.id,
            brand_id: row.brand_id,
            workspace_id: row.workspace_id,
            url: row.url,
            progress,
            created_at: row.created_at,
            updated_at: row.updated_at,
            retry_count: row.retry_count,
            attempt: row.attempt,
            worker_info,
            state,
        })
    }
}
