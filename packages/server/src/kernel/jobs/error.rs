use thiserror::Error;

use super::job::CrawlJob;
use crate::common::CrawlJobId;

/// Errors raised by the crawl job store and the enqueue path.
///
/// Claim conflicts and lost ownership are not errors: they surface as empty
/// claim results and `false` returns from the conditional writes.
#[derive(Error, Debug)]
pub enum CrawlJobError {
    #[error("invalid crawl request: {0}")]
    Validation(String),

    #[error("crawl job {} is already in flight for this brand and url", .existing.id)]
    Duplicate { existing: Box<CrawlJob> },

    #[error("crawl job {0} not found")]
    NotFound(CrawlJobId),

    #[error("crawl job {id} has an inconsistent row: {reason}")]
    CorruptRow { id: CrawlJobId, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = CrawlJobError> = std::result::Result<T, E>;
