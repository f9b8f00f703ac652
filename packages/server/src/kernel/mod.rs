//! Kernel module - queue infrastructure and external collaborators.

pub mod clock;
pub mod jobs;
pub mod pipeline;
pub mod scheduled_tasks;
pub mod test_dependencies;

pub use clock::{Clock, SystemClock};
pub use pipeline::{BrandExtractionPipeline, CrawlRequest, HttpExtractionPipeline, ProgressReporter};
pub use test_dependencies::{ManualClock, MockPipeline};
