//! Crawl job claimer and processor.
//!
//! `run_once` claims a batch and drives each job through the extraction
//! pipeline:
//!
//! ```text
//! claim_batch ──► for each job (concurrently)
//!                   ├─► pipeline.extract(progress)      panics are caught
//!                   ├─► heartbeat on progress + interval
//!                   │      └─ lost ownership ─► drop pipeline, no finalize
//!                   └─► finalize(completed | failed)
//! ```
//!
//! Every exit from the pipeline, including a panic, ends in `finalize`. The
//! reaper only covers process death.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::kernel::jobs::{CrawlJob, CrawlJobStore, JobOutcome, Result, WorkerInfo};
use crate::kernel::pipeline::{BrandExtractionPipeline, CrawlRequest, ProgressReporter};

/// Heartbeats happen at least this many times per stale threshold.
pub const HEARTBEAT_SAFETY_FACTOR: u32 = 3;

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_claim_batch: usize,
    pub stale_threshold: Duration,
    pub heartbeat_interval: Duration,
    /// Reclaim stale processing rows directly while `retry_count` is below this.
    pub stale_retry_limit: Option<i32>,
    pub worker: WorkerInfo,
}

impl ProcessorConfig {
    pub fn new(queue: &QueueConfig, worker: WorkerInfo) -> Self {
        Self {
            max_claim_batch: queue.max_claim_batch,
            stale_threshold: queue.stale_threshold,
            heartbeat_interval: max_heartbeat_interval(queue.stale_threshold),
            stale_retry_limit: queue.stale_policy.stale_reclaim_limit(),
            worker,
        }
    }

    /// Heartbeat more often than the default; never less often.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval
            .min(max_heartbeat_interval(self.stale_threshold))
            .max(MIN_HEARTBEAT_INTERVAL);
        self
    }
}

fn max_heartbeat_interval(stale_threshold: Duration) -> Duration {
    (stale_threshold / HEARTBEAT_SAFETY_FACTOR).max(MIN_HEARTBEAT_INTERVAL)
}

/// Counts from one `run_once`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Ownership lost mid-run; the row belongs to someone else now.
    pub abandoned: usize,
    /// Finalize matched no row (already reaped or finalized).
    pub finalize_conflicts: usize,
    /// Finalize hit a store error; the reaper will recover the row.
    pub finalize_errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobRunOutcome {
    Completed,
    Failed,
    Abandoned,
    FinalizeConflict,
    FinalizeError,
}

pub struct CrawlJobProcessor {
    store: Arc<dyn CrawlJobStore>,
    pipeline: Arc<dyn BrandExtractionPipeline>,
    config: ProcessorConfig,
}

impl CrawlJobProcessor {
    pub fn new(
        store: Arc<dyn CrawlJobStore>,
        pipeline: Arc<dyn BrandExtractionPipeline>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            config,
        }
    }

    /// Claim a batch and process it to completion.
    ///
    /// Only a failing claim query is an error; per-job failures are absorbed
    /// into job state and counted.
    pub async fn run_once(&self) -> Result<ProcessSummary> {
        let jobs = self
            .store
            .claim_batch(
                self.config.max_claim_batch,
                self.config.stale_threshold,
                &self.config.worker,
                self.config.stale_retry_limit,
            )
            .await?;

        let mut summary = ProcessSummary {
            claimed: jobs.len(),
            ..Default::default()
        };

        if jobs.is_empty() {
            debug!(worker_id = %self.config.worker.worker_id, "no crawl jobs to claim");
            return Ok(summary);
        }

        info!(
            worker_id = %self.config.worker.worker_id,
            count = jobs.len(),
            "claimed crawl jobs"
        );

        let outcomes =
            futures::future::join_all(jobs.into_iter().map(|job| self.process_job(job))).await;

        for outcome in outcomes {
            match outcome {
                JobRunOutcome::Completed => summary.completed += 1,
                JobRunOutcome::Failed => summary.failed += 1,
                JobRunOutcome::Abandoned => summary.abandoned += 1,
                JobRunOutcome::FinalizeConflict => summary.finalize_conflicts += 1,
                JobRunOutcome::FinalizeError => summary.finalize_errors += 1,
            }
        }

        Ok(summary)
    }

    async fn process_job(&self, job: CrawlJob) -> JobRunOutcome {
        let request = CrawlRequest::from(&job);
        let (reporter, mut progress_rx) = ProgressReporter::channel();
        let pipeline = self.pipeline.clone();

        info!(job_id = %job.id, attempt = job.attempt, url = %job.url, "crawl job started");

        let run = AssertUnwindSafe(async move { pipeline.extract(&request, reporter).await })
            .catch_unwind();
        tokio::pin!(run);

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // Skip first immediate tick

        let mut progress_open = true;
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                changed = progress_rx.changed(), if progress_open => {
                    if changed.is_err() {
                        progress_open = false;
                        continue;
                    }
                    let progress = *progress_rx.borrow_and_update();
                    if !self.beat(&job, progress).await {
                        return JobRunOutcome::Abandoned;
                    }
                }
                _ = ticker.tick() => {
                    let progress = *progress_rx.borrow();
                    if !self.beat(&job, progress).await {
                        return JobRunOutcome::Abandoned;
                    }
                }
            }
        };

        let outcome = match result {
            Ok(Ok(brand_kit)) => JobOutcome::Completed { result: brand_kit },
            Ok(Err(e)) => {
                warn!(job_id = %job.id, error = %format!("{e:#}"), "crawl pipeline failed");
                JobOutcome::Failed {
                    error_message: format!("{e:#}"),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job_id = %job.id, panic = %message, "crawl pipeline panicked");
                JobOutcome::Failed {
                    error_message: format!("pipeline panicked: {message}"),
                }
            }
        };

        self.finish(&job, outcome).await
    }

    /// Write a heartbeat. Returns `false` only when ownership is lost.
    async fn beat(&self, job: &CrawlJob, progress: u8) -> bool {
        match self.store.heartbeat(job.id, job.attempt, progress).await {
            Ok(true) => {
                debug!(job_id = %job.id, progress, "heartbeat");
                true
            }
            Ok(false) => {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    "lost ownership of crawl job, abandoning pipeline run"
                );
                false
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "heartbeat failed");
                true
            }
        }
    }

    async fn finish(&self, job: &CrawlJob, outcome: JobOutcome) -> JobRunOutcome {
        let run_outcome = match &outcome {
            JobOutcome::Completed { .. } => JobRunOutcome::Completed,
            JobOutcome::Failed { .. } => JobRunOutcome::Failed,
        };

        match self.store.finalize(job.id, job.attempt, outcome).await {
            Ok(true) => {
                info!(job_id = %job.id, attempt = job.attempt, outcome = ?run_outcome, "crawl job finalized");
                run_outcome
            }
            Ok(false) => {
                info!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    "crawl job already finalized or reaped, skipping finalize"
                );
                JobRunOutcome::FinalizeConflict
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to finalize crawl job");
                JobRunOutcome::FinalizeError
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
