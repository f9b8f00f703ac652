//! Stale job reaper.
//!
//! Recovers jobs whose claimant died without finalizing. A job is stale when
//! it is processing and its heartbeat is older than the threshold. Each
//! candidate is re-checked inside its own conditional write, so a worker that
//! heartbeats between the listing and the write keeps its job.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::kernel::jobs::{CrawlJobStore, Result, StalePolicy, StaleTransition};

/// Upper bound on rows examined per sweep.
pub const DEFAULT_SWEEP_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub stale_threshold: Duration,
    pub policy: StalePolicy,
    pub sweep_limit: usize,
}

impl From<&QueueConfig> for ReaperConfig {
    fn from(queue: &QueueConfig) -> Self {
        Self {
            stale_threshold: queue.stale_threshold,
            policy: queue.stale_policy,
            sweep_limit: DEFAULT_SWEEP_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapSummary {
    pub scanned: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Recovered between listing and marking, or marked by another sweep.
    pub skipped: usize,
}

impl ReapSummary {
    pub fn reaped(&self) -> usize {
        self.requeued + self.failed
    }
}

pub struct StaleJobReaper<'a> {
    store: &'a dyn CrawlJobStore,
    config: ReaperConfig,
}

impl<'a> StaleJobReaper<'a> {
    pub fn new(store: &'a dyn CrawlJobStore, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// Run one sweep.
    ///
    /// A failed `mark_stale` on one row is logged and the sweep continues;
    /// only a failing listing query is an error.
    pub async fn run_once(&self) -> Result<ReapSummary> {
        let stale = self
            .store
            .list_stale(self.config.stale_threshold, self.config.sweep_limit)
            .await?;

        let mut summary = ReapSummary {
            scanned: stale.len(),
            ..Default::default()
        };

        for job in stale {
            match self
                .store
                .mark_stale(job.id, self.config.stale_threshold, self.config.policy)
                .await
            {
                Ok(Some(StaleTransition::Requeued { retry_count })) => {
                    info!(job_id = %job.id, retry_count, "requeued stale crawl job");
                    summary.requeued += 1;
                }
                Ok(Some(StaleTransition::Failed)) => {
                    warn!(job_id = %job.id, retry_count = job.retry_count, "failed stale crawl job");
                    summary.failed += 1;
                }
                Ok(None) => {
                    debug!(job_id = %job.id, "stale candidate recovered before marking");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to mark stale crawl job");
                    summary.skipped += 1;
                }
            }
        }

        if summary.reaped() > 0 {
            info!(
                requeued = summary.requeued,
                failed = summary.failed,
                skipped = summary.skipped,
                "stale crawl job sweep finished"
            );
        }

        Ok(summary)
    }
}
