//! HTTP API tests against the axum router

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use poolbroker::config::Config;
use poolbroker::crawler::PageSource;
use poolbroker::server::{AppState, BrokerServer};

use common::{lease_manager, MemorySource};

fn router(source: MemorySource) -> Router {
    let source: Arc<dyn PageSource> = Arc::new(source);
    let leases = Arc::new(lease_manager(
        vec![source],
        Duration::from_secs(60),
        Duration::from_secs(60),
    ));
    BrokerServer::with_state(AppState::new(leases, Config::default())).build_router()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_service_info() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let (status, body) = send(&router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["name"], "poolbroker");
    assert_eq!(body["data"]["target_total"], 500);
}

#[tokio::test]
async fn test_health_reports_cache_and_leases() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let (status, body) = send(&router, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["cache"]["has_snapshot"], false);
    assert_eq!(body["data"]["leases"]["reservations"], 0);
}

#[tokio::test]
async fn test_list_servers() {
    let router = router(MemorySource::with_ids("a", &["x", "y"]));

    let (status, body) = send(&router, get("/api/servers?refresh=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 2);
    assert_eq!(body["data"]["source_report"]["a"]["ok"], true);
    assert_eq!(body["data"]["source_report"]["a"]["count"], 2);
}

#[tokio::test]
async fn test_list_servers_unavailable() {
    let source = MemorySource::with_ids("a", &["x"]);
    source.failing.store(true, std::sync::atomic::Ordering::SeqCst);
    let router = router(source);

    let (status, body) = send(&router, get("/api/servers")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
    assert_eq!(body["category"], "pool");
    // a 400 from the only source will not go away on its own
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_lease_release_flow() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let (status, body) = send(&router, post("/api/lease", json!({"client_id": "A"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["granted"], true);
    assert_eq!(body["data"]["lease"]["instance"]["id"], "x");
    assert!(body["data"]["lease"]["lease_id"].is_string());

    let (status, body) = send(&router, post("/api/lease", json!({"client_id": "B"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["granted"], false);
    assert!(body["data"].get("lease").is_none());

    let (status, body) = send(
        &router,
        post("/api/release", json!({"instance_id": "x", "client_id": "B"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["data"]["status"], "not_found");

    let (status, body) = send(
        &router,
        post("/api/release", json!({"instance_id": "x", "client_id": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "released");
}

#[tokio::test]
async fn test_confirm() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let (status, body) = send(
        &router,
        post("/api/confirm", json!({"instance_id": "x", "client_id": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "confirmed");

    let (_, body) = send(&router, post("/api/lease", json!({"client_id": "B"}))).await;
    assert_eq!(body["data"]["granted"], false);
}

#[tokio::test]
async fn test_missing_identifiers_rejected() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let (status, body) = send(&router, post("/api/lease", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("client_id"));
    assert_eq!(body["category"], "lease");

    let (status, _) = send(&router, post("/api/release", json!({"client_id": "A"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, post("/api/confirm", json!({"instance_id": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lease_without_snapshot_is_unavailable() {
    let source = MemorySource::with_ids("a", &["x"]);
    source.failing.store(true, std::sync::atomic::Ordering::SeqCst);
    let router = router(source);

    let (status, _) = send(&router, post("/api/lease", json!({"client_id": "A"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let _ = poolbroker::metrics::init_metrics();
    let router = router(MemorySource::with_ids("a", &["x"]));

    send(&router, get("/api/health")).await;

    let response = router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("poolbroker_api_requests_total"));
}

#[tokio::test]
async fn test_unknown_route_returns_json_not_found() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let (status, body) = send(&router, get("/api/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"success": false, "error": "not_found"}));

    let (status, body) = send(&router, post("/does/not/exist", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_malformed_body_uses_error_envelope() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let request = Request::builder()
        .method("POST")
        .uri("/api/lease")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());

    for uri in ["/api/release", "/api/confirm"] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(r#"{"instance_id":"x","client_id":"A"}"#))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_wrong_field_type_uses_error_envelope() {
    let router = router(MemorySource::with_ids("a", &["x"]));

    let (status, body) = send(&router, post("/api/lease", json!({"client_id": 7}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
}
