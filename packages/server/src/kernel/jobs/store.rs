//! The crawl job store contract.
//!
//! Every state change is a single conditional write against the store. No
//! implementation may split a predicate check and its write into two
//! operations, since claimants can be independent processes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use typed_builder::TypedBuilder;

use super::error::Result;
use super::job::{CrawlJob, WorkerInfo};
use crate::common::{BrandId, CrawlJobId, WorkspaceId};

/// Error message recorded when the reaper fails a job out.
pub const STALE_ERROR_MESSAGE: &str = "stale: heartbeat timeout";

/// A validated request to insert a pending job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewCrawlJob {
    pub brand_id: BrandId,
    pub workspace_id: WorkspaceId,
    /// Already normalized.
    pub url: String,
}

/// Terminal outcome written by the claimant.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed { result: serde_json::Value },
    Failed { error_message: String },
}

/// What the reaper does to a job whose heartbeat went silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Fail the job immediately.
    Fail,
    /// Requeue to pending until `retry_count` reaches `max_retries`, then fail.
    Requeue { max_retries: i32 },
}

impl StalePolicy {
    /// Retries still allowed below this `retry_count`. Zero for [`StalePolicy::Fail`].
    pub fn retry_limit(&self) -> i32 {
        match self {
            StalePolicy::Fail => 0,
            StalePolicy::Requeue { max_retries } => (*max_retries).max(0),
        }
    }

    /// Limit passed to `claim_batch` for reclaiming stale rows directly.
    pub fn stale_reclaim_limit(&self) -> Option<i32> {
        match self {
            StalePolicy::Fail => None,
            StalePolicy::Requeue { .. } => Some(self.retry_limit()),
        }
    }
}

impl Default for StalePolicy {
    fn default() -> Self {
        StalePolicy::Requeue { max_retries: 2 }
    }
}

/// Transition applied by a successful `mark_stale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleTransition {
    Requeued { retry_count: i32 },
    Failed,
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

#[async_trait]
pub trait CrawlJobStore: Send + Sync {
    /// Insert a pending job.
    ///
    /// Fails with [`CrawlJobError::Duplicate`](super::CrawlJobError::Duplicate)
    /// when a pending or processing job for the same brand and url was created
    /// within `cooldown`. The check and the insert are atomic.
    async fn insert(&self, job: NewCrawlJob, cooldown: Duration) -> Result<CrawlJob>;

    async fn find(&self, id: CrawlJobId) -> Result<Option<CrawlJob>>;

    /// Claim up to `max_jobs` jobs, oldest first.
    ///
    /// Candidates are pending jobs and, when `stale_retry_limit` is set,
    /// processing jobs silent for longer than `stale_threshold` whose
    /// `retry_count` is below the limit. Each candidate is taken with one
    /// compare-and-swap on its observed status and attempt. A candidate lost
    /// to a concurrent claimant is replaced by the next untried eligible row,
    /// so the call returns fewer than `max_jobs` only when none are left.
    async fn claim_batch(
        &self,
        max_jobs: usize,
        stale_threshold: Duration,
        worker: &WorkerInfo,
        stale_retry_limit: Option<i32>,
    ) -> Result<Vec<CrawlJob>>;

    /// Record progress and advance the heartbeat.
    ///
    /// Returns `false` if the job is no longer processing under `attempt`.
    async fn heartbeat(&self, id: CrawlJobId, attempt: i32, progress: u8) -> Result<bool>;

    /// Write the terminal state.
    ///
    /// Returns `false` if the job is no longer processing under `attempt`;
    /// callers must not retry in that case.
    async fn finalize(&self, id: CrawlJobId, attempt: i32, outcome: JobOutcome) -> Result<bool>;

    /// Processing jobs silent for longer than `stale_threshold`, oldest heartbeat first.
    async fn list_stale(&self, stale_threshold: Duration, limit: usize) -> Result<Vec<CrawlJob>>;

    /// Requeue or fail a stale job, re-checking staleness in the same write.
    ///
    /// Returns `None` if the job is not processing or heartbeated recently.
    async fn mark_stale(
        &self,
        id: CrawlJobId,
        stale_threshold: Duration,
        policy: StalePolicy,
    ) -> Result<Option<StaleTransition>>;

    async fn queue_depth(&self) -> Result<QueueDepth>;
}

/// Convert a std duration for timestamp arithmetic, saturating on overflow.
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
