//! One stateless scheduler tick: reap, then claim and process.
//!
//! Ticks may overlap (slow previous run, several cron sources). All
//! coordination happens in the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::processor::{CrawlJobProcessor, ProcessSummary, ProcessorConfig};
use super::reaper::{ReapSummary, ReaperConfig, StaleJobReaper};
use crate::config::QueueConfig;
use crate::kernel::jobs::{CrawlJobStore, Result, WorkerInfo};
use crate::kernel::pipeline::BrandExtractionPipeline;

#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    pub timestamp: DateTime<Utc>,
    pub process: ProcessSummary,
    /// `None` when the reaper phase failed; the process phase still ran.
    pub reap: Option<ReapSummary>,
}

impl TickSummary {
    pub fn message(&self) -> String {
        let mut message = format!(
            "Processed {} job(s): {} completed, {} failed",
            self.process.claimed, self.process.completed, self.process.failed
        );
        if self.process.abandoned > 0 {
            message.push_str(&format!(", {} abandoned", self.process.abandoned));
        }
        match &self.reap {
            Some(reap) if reap.reaped() > 0 => message.push_str(&format!(
                "; reaped {} stale ({} requeued, {} failed)",
                reap.reaped(),
                reap.requeued,
                reap.failed
            )),
            Some(_) => {}
            None => message.push_str("; stale sweep failed"),
        }
        message
    }
}

pub struct TickRunner {
    store: Arc<dyn CrawlJobStore>,
    reaper: ReaperConfig,
    processor: CrawlJobProcessor,
}

impl TickRunner {
    pub fn new(
        store: Arc<dyn CrawlJobStore>,
        pipeline: Arc<dyn BrandExtractionPipeline>,
        queue: &QueueConfig,
        worker: WorkerInfo,
    ) -> Self {
        let processor = CrawlJobProcessor::new(
            store.clone(),
            pipeline,
            ProcessorConfig::new(queue, worker),
        );
        Self {
            store,
            reaper: ReaperConfig::from(queue),
            processor,
        }
    }

    pub fn store(&self) -> &Arc<dyn CrawlJobStore> {
        &self.store
    }

    /// Run the reaper sweep on its own.
    pub async fn reap(&self) -> Result<ReapSummary> {
        StaleJobReaper::new(self.store.as_ref(), self.reaper.clone())
            .run_once()
            .await
    }

    /// Reap, then claim and process one batch.
    ///
    /// A failing sweep is logged and does not block processing; a failing
    /// claim is returned.
    pub async fn tick(&self) -> Result<TickSummary> {
        let reap = match self.reap().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "stale crawl job sweep failed");
                None
            }
        };

        let process = self.processor.run_once().await?;

        let summary = TickSummary {
            timestamp: Utc::now(),
            process,
            reap,
        };
        if process.claimed > 0 || summary.reap.is_some_and(|r| r.reaped() > 0) {
            info!(message = %summary.message(), "crawl tick finished");
        }
        Ok(summary)
    }
}
