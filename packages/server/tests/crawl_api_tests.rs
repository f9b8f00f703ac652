//! HTTP contract of the crawl endpoints, driven through the router.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use crawl_core::common::{BrandId, WorkspaceId};
use crawl_core::domains::crawling::TickRunner;
use crawl_core::kernel::jobs::{CrawlJobStore, MemoryCrawlJobStore, WorkerInfo};
use crawl_core::kernel::MockPipeline;
use crawl_core::server::{build_app, AppState};
use crawl_core::QueueConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "test-cron-secret";

struct TestApp {
    router: Router,
    store: Arc<dyn CrawlJobStore>,
    pipeline: Arc<MockPipeline>,
}

fn app_with(pipeline: MockPipeline) -> TestApp {
    let store: Arc<dyn CrawlJobStore> = Arc::new(MemoryCrawlJobStore::new());
    let pipeline = Arc::new(pipeline);
    let queue = QueueConfig::default();
    let tick = Arc::new(TickRunner::new(
        store.clone(),
        pipeline.clone(),
        &queue,
        WorkerInfo::current("api-test"),
    ));

    TestApp {
        router: build_app(AppState::new(tick, queue, SECRET)),
        store,
        pipeline,
    }
}

fn app() -> TestApp {
    app_with(MockPipeline::succeeding(json!({"name": "Acme", "colors": ["#ff0000"]})))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn start_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/crawl/start")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn start_body(url: &str, brand_id: BrandId) -> Value {
    json!({
        "url": url,
        "brand_id": brand_id.to_string(),
        "workspace_id": WorkspaceId::new().to_string(),
    })
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn process_jobs(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn start_creates_pending_job_with_poll_url() {
    let app = app();

    let (status, body) = send(&app.router, start_request(start_body("https://acme.example/", BrandId::new()))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    let run_id = body["runId"].as_str().unwrap();
    assert_eq!(body["pollUrl"], format!("/api/crawl/status/{run_id}"));
}

#[tokio::test]
async fn start_twice_returns_existing_job() {
    let app = app();
    let brand = BrandId::new();

    let (first_status, first) = send(&app.router, start_request(start_body("https://acme.example/", brand))).await;
    let (second_status, second) = send(&app.router, start_request(start_body("https://acme.example/", brand))).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["runId"], second["runId"]);
    assert_eq!(app.store.queue_depth().await.unwrap().pending, 1);
}

#[tokio::test]
async fn start_rejects_invalid_input() {
    let app = app();

    let cases = [
        json!({"url": "not a url", "brand_id": BrandId::new().to_string(), "workspace_id": WorkspaceId::new().to_string()}),
        json!({"url": "ftp://acme.example/", "brand_id": BrandId::new().to_string(), "workspace_id": WorkspaceId::new().to_string()}),
        json!({"url": "https://acme.example/", "brand_id": "brand-1", "workspace_id": WorkspaceId::new().to_string()}),
        json!({"url": "https://acme.example/", "workspace_id": WorkspaceId::new().to_string()}),
    ];

    for body in cases {
        let (status, response) = send(&app.router, start_request(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert!(response["error"].is_string());
    }
    assert_eq!(app.store.queue_depth().await.unwrap().pending, 0);
}

#[tokio::test]
async fn start_rejects_malformed_json() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/crawl/start")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn status_of_unknown_job_is_404() {
    let app = app();
    let (status, _) = send(&app.router, get(&format!("/api/crawl/status/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_with_bad_id_is_400() {
    let app = app();
    let (status, _) = send(&app.router, get("/api/crawl/status/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn process_jobs_requires_secret() {
    let app = app();
    send(&app.router, start_request(start_body("https://acme.example/", BrandId::new()))).await;

    let (missing, _) = send(&app.router, process_jobs("/api/crawl/process-jobs")).await;
    let (wrong, _) = send(&app.router, process_jobs("/api/crawl/process-jobs?secret=nope")).await;

    assert_eq!(missing, StatusCode::FORBIDDEN);
    assert_eq!(wrong, StatusCode::FORBIDDEN);
    // No side effects on rejection
    assert!(app.pipeline.calls().is_empty());
    assert_eq!(app.store.queue_depth().await.unwrap().pending, 1);
}

#[tokio::test]
async fn process_jobs_accepts_bearer_token() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/crawl/process-jobs")
        .header(header::AUTHORIZATION, format!("Bearer {SECRET}"))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["claimed"], 0);
}

#[tokio::test]
async fn full_crawl_lifecycle_over_http() {
    let app = app();

    let (_, started) = send(&app.router, start_request(start_body("https://acme.example/", BrandId::new()))).await;
    let run_id = started["runId"].as_str().unwrap().to_string();

    let (status, summary) = send(
        &app.router,
        process_jobs(&format!("/api/crawl/process-jobs?secret={SECRET}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["claimed"], 1);
    assert_eq!(summary["completed"], 1);
    assert_eq!(summary["failed"], 0);
    assert!(summary["message"].is_string());
    assert!(summary["timestamp"].is_string());

    let (status, view) = send(&app.router, get(&format!("/api/crawl/status/{run_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "completed");
    assert_eq!(view["progress"], 100);
    assert_eq!(view["result"]["name"], "Acme");
    assert!(view["startedAt"].is_string());
    assert!(view["finishedAt"].is_string());
    assert!(view.get("workerInfo").is_none());
    assert!(view.get("errorMessage").is_none());
}

#[tokio::test]
async fn failed_pipeline_still_returns_200() {
    let app = app_with(MockPipeline::failing("brand site returned 500").with_progress(vec![10], Duration::ZERO));

    let (_, started) = send(&app.router, start_request(start_body("https://acme.example/", BrandId::new()))).await;
    let run_id = started["runId"].as_str().unwrap().to_string();

    let (status, summary) = send(
        &app.router,
        process_jobs(&format!("/api/crawl/process-jobs?secret={SECRET}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["failed"], 1);

    let (_, view) = send(&app.router, get(&format!("/api/crawl/status/{run_id}"))).await;
    assert_eq!(view["status"], "failed");
    assert!(view["errorMessage"].as_str().unwrap().contains("returned 500"));
    assert!(view.get("result").is_none());
}

#[tokio::test]
async fn health_reports_queue_depth() {
    let app = app();
    send(&app.router, start_request(start_body("https://acme.example/", BrandId::new()))).await;

    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue"]["pending"], 1);
}
