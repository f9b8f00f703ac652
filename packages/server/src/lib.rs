// Brand Crawl Jobs - queue core
//
// This crate owns the lifecycle of brand crawl jobs: enqueue, claim,
// heartbeat, finalize and stale recovery. Coordination between workers
// happens entirely through conditional writes on the job row.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
