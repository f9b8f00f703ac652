//! In-process trigger using tokio-cron-scheduler.
//!
//! Optional stand-in for the external cron that calls
//! `POST /api/crawl/process-jobs`. It runs the same stateless tick, so it can
//! overlap with external triggers or with a slow previous run.
//!
//! ```text
//! Scheduler (TICK_CRON, default every minute)
//!     │
//!     └─► TickRunner::tick()
//!             ├─► reaper phase
//!             └─► claim + process phase
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::crawling::TickRunner;

/// Start the crawl tick on `cron` (six-field, seconds first).
pub async fn start_scheduler(tick: Arc<TickRunner>, cron: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let tick_job = Job::new_async(cron, move |_uuid, _lock| {
        let tick = tick.clone();
        Box::pin(async move {
            match tick.tick().await {
                Ok(summary) => tracing::debug!(message = %summary.message(), "scheduled crawl tick finished"),
                Err(e) => tracing::error!(error = %e, "scheduled crawl tick failed"),
            }
        })
    })?;

    scheduler.add(tick_job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %cron, "in-process crawl scheduler started");
    Ok(scheduler)
}
