//! Typed ID definitions for the crawl queue entities.

pub use super::id::Id;

/// Marker type for crawl jobs.
pub struct CrawlJobEntity;

/// Marker type for brands (tenant-scoped owner of a crawl).
pub struct BrandEntity;

/// Marker type for workspaces.
pub struct WorkspaceEntity;

/// Typed ID for crawl jobs. Returned to clients as `runId`.
pub type CrawlJobId = Id<CrawlJobEntity>;

/// Typed ID for brands.
pub type BrandId = Id<BrandEntity>;

/// Typed ID for workspaces.
pub type WorkspaceId = Id<WorkspaceEntity>;
