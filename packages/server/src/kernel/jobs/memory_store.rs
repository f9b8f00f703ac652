//! In-memory crawl job store.
//!
//! Used by tests and single-process local runs. Every conditional write runs
//! under one write lock, which gives it the same atomicity as a single SQL
//! statement. `claim_batch` keeps the two-phase shape of the SQL store
//! (snapshot candidates, then compare-and-swap each one) so concurrent
//! claimers really do race on candidates. A lost candidate is replaced by the
//! next eligible row until the batch is full or nothing is left.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::{CrawlJobError, Result};
use super::job::{CrawlJob, CrawlJobRecord, CrawlJobStatus, WorkerInfo};
use super::store::{
    chrono_duration, CrawlJobStore, JobOutcome, NewCrawlJob, QueueDepth, StalePolicy,
    StaleTransition, STALE_ERROR_MESSAGE,
};
use crate::common::CrawlJobId;
use crate::kernel::clock::{Clock, SystemClock};

pub struct MemoryCrawlJobStore {
    jobs: Arc<RwLock<HashMap<CrawlJobId, CrawlJobRecord>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCrawlJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    fn is_stale(&self, row: &CrawlJobRecord, stale_threshold: Duration) -> bool {
        let Some(cutoff) = self
            .clock
            .now()
            .checked_sub_signed(chrono_duration(stale_threshold))
        else {
            return false;
        };
        row.status == CrawlJobStatus::Processing && row.updated_at < cutoff
    }

    /// Next heartbeat value; never equal to the previous one.
    fn advance(&self, previous: DateTime<Utc>) -> DateTime<Utc> {
        self.clock
            .now()
            .max(previous + chrono::Duration::microseconds(1))
    }
}

impl Default for MemoryCrawlJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrawlJobStore for MemoryCrawlJobStore {
    async fn insert(&self, job: NewCrawlJob, cooldown: Duration) -> Result<CrawlJob> {
        let mut jobs = self.jobs.write().await;
        let now = self.clock.now();
        let window_start = now - chrono_duration(cooldown);

        let existing = jobs
            .values()
            .filter(|row| {
                row.brand_id == job.brand_id
                    && row.url == job.url
                    && row.status.is_in_flight()
                    && row.created_at > window_start
            })
            .max_by_key(|row| row.created_at);

        if let Some(existing) = existing {
            return Err(CrawlJobError::Duplicate {
                existing: Box::new(CrawlJob::try_from(existing.clone())?),
            });
        }

        let row = CrawlJobRecord::pending(job.brand_id, job.workspace_id, job.url, now);
        jobs.insert(row.id, row.clone());

        CrawlJob::try_from(row)
    }

    async fn find(&self, id: CrawlJobId) -> Result<Option<CrawlJob>> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).cloned().map(CrawlJob::try_from).transpose()
    }

    async fn claim_batch(
        &self,
        max_jobs: usize,
        stale_threshold: Duration,
        worker: &WorkerInfo,
        stale_retry_limit: Option<i32>,
    ) -> Result<Vec<CrawlJob>> {
        let mut claimed = Vec::with_capacity(max_jobs);
        let mut tried: HashSet<CrawlJobId> = HashSet::new();

        while claimed.len() < max_jobs {
            // Phase 1: observe candidates not yet tried by this call.
            let candidates: Vec<(CrawlJobId, CrawlJobStatus, i32)> = {
                let jobs = self.jobs.read().await;
                let mut eligible: Vec<&CrawlJobRecord> = jobs
                    .values()
                    .filter(|row| !tried.contains(&row.id))
                    .filter(|row| match row.status {
                        CrawlJobStatus::Pending => true,
                        CrawlJobStatus::Processing => stale_retry_limit
                            .map(|limit| {
                                row.retry_count < limit && self.is_stale(row, stale_threshold)
                            })
                            .unwrap_or(false),
                        _ => false,
                    })
                    .collect();
                eligible.sort_by_key(|row| (row.created_at, row.id));
                eligible
                    .into_iter()
                    .take(max_jobs - claimed.len())
                    .map(|row| (row.id, row.status, row.attempt))
                    .collect()
            };

            if candidates.is_empty() {
                break;
            }

            // Phase 2: compare-and-swap each candidate.
            for (id, observed_status, observed_attempt) in candidates {
                tried.insert(id);
                tokio::task::yield_now().await;

                let mut jobs = self.jobs.write().await;
                let Some(row) = jobs.get_mut(&id) else {
                    continue;
                };

                let still_eligible = row.status == observed_status
                    && row.attempt == observed_attempt
                    && (row.status == CrawlJobStatus::Pending
                        || self.is_stale(row, stale_threshold));

                if !still_eligible {
                    debug!(job_id = %id, "claim conflict, candidate taken by another worker");
                    continue;
                }

                let now = self.clock.now();
                if row.status == CrawlJobStatus::Processing {
                    row.retry_count += 1;
                }
                row.status = CrawlJobStatus::Processing;
                row.started_at = Some(now);
                row.updated_at = self.advance(row.updated_at);
                row.worker_info = Some(Json(worker.clone()));
                row.attempt += 1;
                row.progress = 0;

                claimed.push(CrawlJob::try_from(row.clone())?);
            }
        }

        Ok(claimed)
    }

    async fn heartbeat(&self, id: CrawlJobId, attempt: i32, progress: u8) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(row) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != CrawlJobStatus::Processing || row.attempt != attempt {
            return Ok(false);
        }

        row.progress = row.progress.max(i16::from(progress.min(100)));
        row.updated_at = self.advance(row.updated_at);
        Ok(true)
    }

    async fn finalize(&self, id: CrawlJobId, attempt: i32, outcome: JobOutcome) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(row) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != CrawlJobStatus::Processing || row.attempt != attempt {
            return Ok(false);
        }

        let now = self.advance(row.updated_at);
        match outcome {
            JobOutcome::Completed { result } => {
                row.status = CrawlJobStatus::Completed;
                row.result = Some(result);
                row.progress = 100;
            }
            JobOutcome::Failed { error_message } => {
                row.status = CrawlJobStatus::Failed;
                row.error_message = Some(error_message);
            }
        }
        row.finished_at = Some(now);
        row.updated_at = now;
        Ok(true)
    }

    async fn list_stale(&self, stale_threshold: Duration, limit: usize) -> Result<Vec<CrawlJob>> {
        let jobs = self.jobs.read().await;
        let mut stale: Vec<&CrawlJobRecord> = jobs
            .values()
            .filter(|row| self.is_stale(row, stale_threshold))
            .collect();
        stale.sort_by_key(|row| row.updated_at);

        stale
            .into_iter()
            .take(limit)
            .cloned()
            .map(CrawlJob::try_from)
            .collect()
    }

    async fn mark_stale(
        &self,
        id: CrawlJobId,
        stale_threshold: Duration,
        policy: StalePolicy,
    ) -> Result<Option<StaleTransition>> {
        let mut jobs = self.jobs.write().await;
        let Some(row) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if !self.is_stale(row, stale_threshold) {
            return Ok(None);
        }

        let now = self.clock.now();
        if row.retry_count < policy.retry_limit() {
            row.status = CrawlJobStatus::Pending;
            row.retry_count += 1;
            row.progress = 0;
            row.updated_at = now;
            Ok(Some(StaleTransition::Requeued {
                retry_count: row.retry_count,
            }))
        } else {
            row.status = CrawlJobStatus::Failed;
            row.error_message = Some(STALE_ERROR_MESSAGE.to_string());
            row.finished_at = Some(now);
            row.updated_at = now;
            Ok(Some(StaleTransition::Failed))
        }
    }

    async fn queue_depth(&self) -> Result<QueueDepth> {
        let jobs = self.jobs.read().await;
        let mut depth = QueueDepth::default();
        for row in jobs.values() {
            match row.status {
                CrawlJobStatus::Pending => depth.pending += 1,
                CrawlJobStatus::Processing => depth.processing += 1,
                CrawlJobStatus::Completed => depth.completed += 1,
                CrawlJobStatus::Failed => depth.failed += 1,
            }
        }
        Ok(depth)
    }
}
