//! PostgreSQL-backed crawl job store.
//!
//! Each transition is one `UPDATE ... WHERE <predicate> RETURNING` statement.
//! Under READ COMMITTED a second writer racing on the same row blocks, then
//! re-evaluates the predicate against the committed row and matches nothing.
//! That is the whole exactly-once mechanism; there are no application locks.
//!
//! Heartbeat timestamps use `clock_timestamp()` so successive writes inside
//! one session still advance, and `GREATEST(.., updated_at + 1µs)` keeps the
//! heartbeat strictly increasing even if the database clock stalls.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{CrawlJobError, Result};
use super::job::{CrawlJob, CrawlJobRecord, CrawlJobStatus, WorkerInfo};
use super::store::{
    CrawlJobStore, JobOutcome, NewCrawlJob, QueueDepth, StalePolicy, StaleTransition,
    STALE_ERROR_MESSAGE,
};
use crate::common::CrawlJobId;

const COLUMNS: &str = "id, brand_id, workspace_id, url, status, progress, error_message, result, \
    created_at, started_at, finished_at, updated_at, worker_info, retry_count, attempt";

#[derive(Clone)]
pub struct PostgresCrawlJobStore {
    pool: PgPool,
}

impl PostgresCrawlJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Compare-and-swap one claim candidate.
    async fn try_claim(
        &self,
        candidate: &CrawlJobRecord,
        stale_threshold: Duration,
        worker: &WorkerInfo,
    ) -> Result<Option<CrawlJobRecord>> {
        let sql = format!(
            r#"
            UPDATE crawl_jobs
            SET status = 'processing',
                started_at = clock_timestamp(),
                updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond'),
                worker_info = $4,
                attempt = attempt + 1,
                progress = 0,
                retry_count = CASE WHEN status = 'processing' THEN retry_count + 1 ELSE retry_count END
            WHERE id = $1
              AND status = $2
              AND attempt = $3
              AND (status = 'pending'
                   OR updated_at < clock_timestamp() - make_interval(secs => $5))
            RETURNING {COLUMNS}
            "#
        );

        let claimed = sqlx::query_as::<_, CrawlJobRecord>(&sql)
            .bind(candidate.id)
            .bind(candidate.status)
            .bind(candidate.attempt)
            .bind(Json(worker))
            .bind(stale_threshold.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(claimed)
    }
}

#[async_trait]
impl CrawlJobStore for PostgresCrawlJobStore {
    async fn insert(&self, job: NewCrawlJob, cooldown: Duration) -> Result<CrawlJob> {
        let mut tx = self.pool.begin().await?;

        // Serializes enqueues of the same (brand, url) until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text || '|' || $2, 0))")
            .bind(job.brand_id)
            .bind(&job.url)
            .execute(&mut *tx)
            .await?;

        let existing_sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM crawl_jobs
            WHERE brand_id = $1
              AND url = $2
              AND status IN ('pending', 'processing')
              AND created_at > NOW() - make_interval(secs => $3)
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );

        let existing = sqlx::query_as::<_, CrawlJobRecord>(&existing_sql)
            .bind(job.brand_id)
            .bind(&job.url)
            .bind(cooldown.as_secs_f64())
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(existing) = existing {
            tx.rollback().await?;
            return Err(CrawlJobError::Duplicate {
                existing: Box::new(CrawlJob::try_from(existing)?),
            });
        }

        let insert_sql = format!(
            r#"
            INSERT INTO crawl_jobs (id, brand_id, workspace_id, url, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW(), NOW())
            RETURNING {COLUMNS}
            "#
        );

        let inserted = sqlx::query_as::<_, CrawlJobRecord>(&insert_sql)
            .bind(CrawlJobId::new())
            .bind(job.brand_id)
            .bind(job.workspace_id)
            .bind(&job.url)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        CrawlJob::try_from(inserted)
    }

    async fn find(&self, id: CrawlJobId) -> Result<Option<CrawlJob>> {
        let sql = format!("SELECT {COLUMNS} FROM crawl_jobs WHERE id = $1");

        sqlx::query_as::<_, CrawlJobRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(CrawlJob::try_from)
            .transpose()
    }

    async fn claim_batch(
        &self,
        max_jobs: usize,
        stale_threshold: Duration,
        worker: &WorkerInfo,
        stale_retry_limit: Option<i32>,
    ) -> Result<Vec<CrawlJob>> {
        if max_jobs == 0 {
            return Ok(Vec::new());
        }

        let candidates_sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM crawl_jobs
            WHERE (status = 'pending'
                   OR ($3::INTEGER IS NOT NULL
                       AND status = 'processing'
                       AND updated_at < clock_timestamp() - make_interval(secs => $2)
                       AND retry_count < $3))
              AND id <> ALL($4::UUID[])
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#
        );

        let mut claimed = Vec::with_capacity(max_jobs);
        let mut tried: Vec<Uuid> = Vec::new();

        // A candidate lost to another claimer is replaced by the next one.
        while claimed.len() < max_jobs {
            let wanted = max_jobs - claimed.len();
            let candidates = sqlx::query_as::<_, CrawlJobRecord>(&candidates_sql)
                .bind(i64::try_from(wanted).unwrap_or(i64::MAX))
                .bind(stale_threshold.as_secs_f64())
                .bind(stale_retry_limit)
                .bind(tried.as_slice())
                .fetch_all(&self.pool)
                .await?;

            if candidates.is_empty() {
                break;
            }

            for candidate in &candidates {
                tried.push(candidate.id.into_uuid());
                match self.try_claim(candidate, stale_threshold, worker).await? {
                    Some(row) => {
                        if candidate.status == CrawlJobStatus::Processing {
                            info!(
                                job_id = %row.id,
                                attempt = row.attempt,
                                retry_count = row.retry_count,
                                "reclaimed stale crawl job"
                            );
                        }
                        claimed.push(CrawlJob::try_from(row)?);
                    }
                    None => {
                        debug!(job_id = %candidate.id, "claim conflict, candidate taken by another worker");
                    }
                }
            }
        }

        Ok(claimed)
    }

    async fn heartbeat(&self, id: CrawlJobId, attempt: i32, progress: u8) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET progress = GREATEST(progress, $3),
                updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $1 AND status = 'processing' AND attempt = $2
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(i16::from(progress.min(100)))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn finalize(&self, id: CrawlJobId, attempt: i32, outcome: JobOutcome) -> Result<bool> {
        let result = match outcome {
            JobOutcome::Completed { result } => {
                sqlx::query(
                    r#"
                    UPDATE crawl_jobs
                    SET status = 'completed',
                        result = $3,
                        progress = 100,
                        finished_at = clock_timestamp(),
                        updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond')
                    WHERE id = $1 AND status = 'processing' AND attempt = $2
                    "#,
                )
                .bind(id)
                .bind(attempt)
                .bind(result)
                .execute(&self.pool)
                .await?
            }
            JobOutcome::Failed { error_message } => {
                sqlx::query(
                    r#"
                    UPDATE crawl_jobs
                    SET status = 'failed',
                        error_message = $3,
                        finished_at = clock_timestamp(),
                        updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond')
                    WHERE id = $1 AND status = 'processing' AND attempt = $2
                    "#,
                )
                .bind(id)
                .bind(attempt)
                .bind(error_message)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale(&self, stale_threshold: Duration, limit: usize) -> Result<Vec<CrawlJob>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM crawl_jobs
            WHERE status = 'processing'
              AND updated_at < clock_timestamp() - make_interval(secs => $1)
            ORDER BY updated_at ASC
            LIMIT $2
            "#
        );

        sqlx::query_as::<_, CrawlJobRecord>(&sql)
            .bind(stale_threshold.as_secs_f64())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(CrawlJob::try_from)
            .collect()
    }

    async fn mark_stale(
        &self,
        id: CrawlJobId,
        stale_threshold: Duration,
        policy: StalePolicy,
    ) -> Result<Option<StaleTransition>> {
        let sql = format!(
            r#"
            UPDATE crawl_jobs
            SET status = CASE WHEN retry_count < $3
                              THEN 'pending'::crawl_job_status
                              ELSE 'failed'::crawl_job_status END,
                retry_count = CASE WHEN retry_count < $3 THEN retry_count + 1 ELSE retry_count END,
                progress = CASE WHEN retry_count < $3 THEN 0 ELSE progress END,
                error_message = CASE WHEN retry_count < $3 THEN NULL ELSE $4::TEXT END,
                finished_at = CASE WHEN retry_count < $3 THEN NULL ELSE clock_timestamp() END,
                updated_at = clock_timestamp()
            WHERE id = $1
              AND status = 'processing'
              AND updated_at < clock_timestamp() - make_interval(secs => $2)
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, CrawlJobRecord>(&sql)
            .bind(id)
            .bind(stale_threshold.as_secs_f64())
            .bind(policy.retry_limit())
            .bind(STALE_ERROR_MESSAGE)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| match row.status {
            CrawlJobStatus::Pending => StaleTransition::Requeued {
                retry_count: row.retry_count,
            },
            _ => StaleTransition::Failed,
        }))
    }

    async fn queue_depth(&self) -> Result<QueueDepth> {
        let rows = sqlx::query_as::<_, (CrawlJobStatus, i64)>(
            "SELECT status, COUNT(*) FROM crawl_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut depth = QueueDepth::default();
        for (status, count) in rows {
            match status {
                CrawlJobStatus::Pending => depth.pending = count,
                CrawlJobStatus::Processing => depth.processing = count,
                CrawlJobStatus::Completed => depth.completed = count,
                CrawlJobStatus::Failed => depth.failed = count,
            }
        }

        Ok(depth)
    }
}
