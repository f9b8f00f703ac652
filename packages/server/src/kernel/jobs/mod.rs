//! Crawl job persistence.
//!
//! - [`CrawlJobStore`] - the conditional-write contract every store honours
//! - [`PostgresCrawlJobStore`] - production store over `crawl_jobs`
//! - [`MemoryCrawlJobStore`] - in-process store for tests and local runs
//! - [`CrawlJob`] / [`JobState`] - typed job model
//!
//! # State machine
//!
//! ```text
//! pending ──claim──► processing ──finalize(ok)───► completed
//!    ▲                   │  │
//!    │                   │  └──finalize(err)────► failed
//!    └──mark_stale(requeue)  └──mark_stale(fail)─► failed
//! ```

mod error;
mod job;
mod memory_store;
mod postgres_store;
mod store;

pub use error::{CrawlJobError, Result};
pub use job::{CrawlJob, CrawlJobStatus, JobState, WorkerInfo};
pub use memory_store::MemoryCrawlJobStore;
pub use postgres_store::PostgresCrawlJobStore;
pub use store::{
    CrawlJobStore, JobOutcome, NewCrawlJob, QueueDepth, StalePolicy, StaleTransition,
    STALE_ERROR_MESSAGE,
};
