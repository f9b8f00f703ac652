//! Crawling domain - brand crawl jobs from enqueue to terminal state
//!
//! # Components
//!
//! - `actions/` - Start-crawl and status actions used by the HTTP edge
//! - `processor` - Claims a batch and drives each job through the pipeline
//! - `reaper` - Recovers jobs whose claimant stopped heartbeating
//! - `tick` - One scheduler tick: reap, then process

pub mod actions;
pub mod processor;
pub mod reaper;
pub mod tick;

pub use processor::{CrawlJobProcessor, ProcessSummary, ProcessorConfig, HEARTBEAT_SAFETY_FACTOR};
pub use reaper::{ReapSummary, ReaperConfig, StaleJobReaper};
pub use tick::{TickRunner, TickSummary};
