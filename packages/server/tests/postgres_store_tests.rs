//! PostgreSQL store behaviour under real row-level concurrency.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crawl_core::common::{BrandId, WorkspaceId};
use crawl_core::kernel::jobs::{
    CrawlJob, CrawlJobError, CrawlJobStatus, CrawlJobStore, JobOutcome, JobState, NewCrawlJob,
    PostgresCrawlJobStore, StalePolicy, StaleTransition, WorkerInfo, STALE_ERROR_MESSAGE,
};
use test_context::test_context;

use crate::common::TestHarness;

const THRESHOLD: Duration = Duration::from_secs(600);
const SHORT_THRESHOLD: Duration = Duration::from_millis(200);
const COOLDOWN: Duration = Duration::from_secs(300);

fn new_job(brand_id: BrandId, url: &str) -> NewCrawlJob {
    NewCrawlJob::builder()
        .brand_id(brand_id)
        .workspace_id(WorkspaceId::new())
        .url(url)
        .build()
}

async fn insert(store: &PostgresCrawlJobStore, url: &str) -> CrawlJob {
    store.insert(new_job(BrandId::new(), url), COOLDOWN).await.unwrap()
}

async fn claim_one(store: &PostgresCrawlJobStore, worker: &str) -> CrawlJob {
    store
        .claim_batch(1, THRESHOLD, &WorkerInfo::current(worker), None)
        .await
        .unwrap()
        .remove(0)
}

async fn let_heartbeat_go_stale() {
    tokio::time::sleep(SHORT_THRESHOLD * 2).await;
}

#[test_context(TestHarness)]
#[tokio::test]
async fn insert_and_find_round_trip(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    let job = insert(&store, "https://acme.example/").await;

    let found = store.find(job.id).await.unwrap().unwrap();
    assert_eq!(found.id, job.id);
    assert_eq!(found.status(), CrawlJobStatus::Pending);
    assert_eq!(found.progress, 0);
    assert_eq!(found.attempt, 0);
    assert!(found.worker_info.is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_duplicate_enqueues_create_one_job(ctx: &mut TestHarness) {
    let store = Arc::new(PostgresCrawlJobStore::new(ctx.db_pool.clone()));
    let brand = BrandId::new();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.insert(new_job(brand, "https://acme.example/"), COOLDOWN).await
        }));
    }

    let mut ids = HashSet::new();
    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(job) => {
                created += 1;
                ids.insert(job.id);
            }
            Err(CrawlJobError::Duplicate { existing }) => {
                ids.insert(existing.id);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_claimers_share_no_job(ctx: &mut TestHarness) {
    let store = Arc::new(PostgresCrawlJobStore::new(ctx.db_pool.clone()));
    for i in 0..10 {
        insert(&store, &format!("https://brand{i}.example/")).await;
    }

    let mut handles = Vec::new();
    for i in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .claim_batch(5, THRESHOLD, &WorkerInfo::current(format!("w{i}")), Some(2))
                .await
                .unwrap()
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for job in handle.await.unwrap() {
            assert_eq!(job.attempt, 1);
            assert!(seen.insert(job.id), "job {} claimed twice", job.id);
        }
    }
    assert_eq!(seen.len(), 10);
    assert_eq!(store.queue_depth().await.unwrap().processing, 10);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn claim_order_is_oldest_first(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    let first = insert(&store, "https://first.example/").await;
    let second = insert(&store, "https://second.example/").await;
    insert(&store, "https://third.example/").await;

    let claimed = store
        .claim_batch(2, THRESHOLD, &WorkerInfo::current("w1"), None)
        .await
        .unwrap();

    let ids: Vec<_> = claimed.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn heartbeat_advances_and_keeps_progress_monotonic(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    insert(&store, "https://acme.example/").await;
    let job = claim_one(&store, "w1").await;

    let mut last = job.updated_at;
    for progress in [30, 20, 60] {
        assert!(store.heartbeat(job.id, job.attempt, progress).await.unwrap());
        let current = store.find(job.id).await.unwrap().unwrap();
        assert!(current.updated_at > last);
        last = current.updated_at;
    }

    assert_eq!(store.find(job.id).await.unwrap().unwrap().progress, 60);
    assert!(!store.heartbeat(job.id, job.attempt + 1, 90).await.unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn finalize_writes_terminal_state_once(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    insert(&store, "https://acme.example/").await;
    let job = claim_one(&store, "w1").await;

    let outcome = JobOutcome::Completed {
        result: serde_json::json!({"logo": "https://acme.example/logo.svg"}),
    };
    assert!(store.finalize(job.id, job.attempt, outcome).await.unwrap());
    assert!(!store
        .finalize(
            job.id,
            job.attempt,
            JobOutcome::Failed {
                error_message: "late".into()
            }
        )
        .await
        .unwrap());

    let done = store.find(job.id).await.unwrap().unwrap();
    assert_eq!(done.progress, 100);
    match done.state {
        JobState::Completed { result, .. } => {
            assert_eq!(result["logo"], "https://acme.example/logo.svg")
        }
        other => panic!("expected completed, got {other:?}"),
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mark_stale_fails_silent_job(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    insert(&store, "https://acme.example/").await;
    let job = claim_one(&store, "crashed").await;

    let_heartbeat_go_stale().await;
    assert_eq!(store.list_stale(SHORT_THRESHOLD, 10).await.unwrap().len(), 1);
    assert_eq!(
        store.mark_stale(job.id, SHORT_THRESHOLD, StalePolicy::Fail).await.unwrap(),
        Some(StaleTransition::Failed)
    );

    let failed = store.find(job.id).await.unwrap().unwrap();
    match failed.state {
        JobState::Failed { error_message, .. } => assert_eq!(error_message, STALE_ERROR_MESSAGE),
        other => panic!("expected failed, got {other:?}"),
    }
    assert!(!store.heartbeat(job.id, job.attempt, 50).await.unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mark_stale_requeues_until_retry_limit(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    insert(&store, "https://acme.example/").await;
    let policy = StalePolicy::Requeue { max_retries: 1 };

    let job = claim_one(&store, "crashed").await;
    let_heartbeat_go_stale().await;
    assert_eq!(
        store.mark_stale(job.id, SHORT_THRESHOLD, policy).await.unwrap(),
        Some(StaleTransition::Requeued { retry_count: 1 })
    );
    let requeued = store.find(job.id).await.unwrap().unwrap();
    assert_eq!(requeued.status(), CrawlJobStatus::Pending);
    assert_eq!(requeued.state.started_at(), job.state.started_at());

    let retry = claim_one(&store, "crashed-again").await;
    assert_eq!(retry.id, job.id);
    assert_eq!(retry.attempt, 2);
    let_heartbeat_go_stale().await;
    assert_eq!(
        store.mark_stale(retry.id, SHORT_THRESHOLD, policy).await.unwrap(),
        Some(StaleTransition::Failed)
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mark_stale_skips_job_that_heartbeated(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    insert(&store, "https://acme.example/").await;
    let job = claim_one(&store, "w1").await;

    let_heartbeat_go_stale().await;
    assert_eq!(store.list_stale(SHORT_THRESHOLD, 10).await.unwrap().len(), 1);
    assert!(store.heartbeat(job.id, job.attempt, 40).await.unwrap());

    assert_eq!(
        store.mark_stale(job.id, SHORT_THRESHOLD, StalePolicy::Fail).await.unwrap(),
        None
    );
    assert_eq!(store.find(job.id).await.unwrap().unwrap().status(), CrawlJobStatus::Processing);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn stale_processing_job_is_reclaimed_with_new_attempt(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    insert(&store, "https://acme.example/").await;
    let first = store
        .claim_batch(1, SHORT_THRESHOLD, &WorkerInfo::current("w1"), Some(2))
        .await
        .unwrap()
        .remove(0);

    let_heartbeat_go_stale().await;
    let second = store
        .claim_batch(1, SHORT_THRESHOLD, &WorkerInfo::current("w2"), Some(2))
        .await
        .unwrap()
        .remove(0);

    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt, first.attempt + 1);
    assert_eq!(second.retry_count, 1);
    assert!(!store.heartbeat(first.id, first.attempt, 80).await.unwrap());
    assert!(!store
        .finalize(
            first.id,
            first.attempt,
            JobOutcome::Completed {
                result: serde_json::json!({})
            }
        )
        .await
        .unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn queue_depth_counts_by_status(ctx: &mut TestHarness) {
    let store = PostgresCrawlJobStore::new(ctx.db_pool.clone());
    for i in 0..3 {
        insert(&store, &format!("https://brand{i}.example/")).await;
    }
    let job = claim_one(&store, "w1").await;
    store
        .finalize(
            job.id,
            job.attempt,
            JobOutcome::Failed {
                error_message: "unreachable".into(),
            },
        )
        .await
        .unwrap();
    claim_one(&store, "w1").await;

    let depth = store.queue_depth().await.unwrap();
    assert_eq!(depth.pending, 1);
    assert_eq!(depth.processing, 1);
    assert_eq!(depth.failed, 1);
    assert_eq!(depth.completed, 0);
}
