//! Crawl actions invoked by the HTTP edge.

mod enqueue;
mod status;

pub use enqueue::{enqueue_crawl, normalize_url, poll_url, validate, EnqueueResult, StartCrawlRequest};
pub use status::{crawl_status, CrawlJobStatusView};
