//! End-to-end tests driving the axum router.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use zentinel_mock_api::http::{build_router, AppState};
use zentinel_mock_api::metrics::RequestMetrics;
use zentinel_mock_api::{MockApi, MockApiConfig};

const CONFIG: &str = r#"
settings:
  log_requests: false
sections:
  users:
    path_pattern: /api/users/*
    body_id_paths: ["$.id", "$.legacy"]
    header_id_name: X-Resource-Id
  items:
    path_pattern: /store/*
    strict_path: true
scenarios:
  - request_path: GET /api/users/broken
    status_code: 503
    content_type: text/plain
    data: down
"#;

fn router() -> Router {
    let config = MockApiConfig::from_yaml(CONFIG).unwrap();
    let metrics = Arc::new(RequestMetrics::new());
    let api = Arc::new(MockApi::new(config, metrics.clone()).unwrap());
    build_router(AppState { api, metrics })
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get("location")
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, location, body.to_vec())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_resource_round_trip() {
    let router = router();

    let (status, location, _) = send(
        &router,
        json_request("POST", "/api/users", json!({"id": 42, "legacy": "u-42", "n": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(location.as_deref(), Some("/api/users/42"));

    let (status, _, body) = send(&router, empty_request("GET", "/api/users/u-42")).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["n"], 1);

    let (status, _, body) = send(
        &router,
        json_request("POST", "/api/users", json!({"id": 42})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"], "conflict");

    let (status, _, body) = send(&router, empty_request("GET", "/api/users")).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 1);

    let (status, _, _) = send(&router, empty_request("DELETE", "/api/users/42")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&router, empty_request("GET", "/api/users/42")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&router, empty_request("DELETE", "/api/users/42")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_header_identifier() {
    let router = router();
    let request = Request::builder()
        .method("POST")
        .uri("/api/users")
        .header("content-type", "application/json")
        .header("x-resource-id", "from-header")
        .body(Body::from(r#"{"id": 1}"#))
        .unwrap();
    let (status, location, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(location.as_deref(), Some("/api/users/from-header"));
}

#[tokio::test]
async fn test_strict_sections_reuse_identifiers() {
    let router = router();
    for uri in ["/store/a/1", "/store/b/1"] {
        let (status, _, _) = send(&router, json_request("PUT", uri, json!({"uri": uri}))).await;
        assert_eq!(status, StatusCode::CREATED, "{}", uri);
    }

    let (_, _, body) = send(&router, empty_request("GET", "/store/b/1")).await;
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["uri"], "/store/b/1");

    let (status, _, _) = send(&router, json_request("PUT", "/store/b/1", json!({"v": 2}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_seed_scenario_overrides_storage() {
    let router = router();
    let (status, _, body) = send(&router, empty_request("GET", "/api/users/broken")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, b"down");
}

#[tokio::test]
async fn test_scenario_admin_crud() {
    let router = router();

    let (status, _, body) = send(
        &router,
        json_request(
            "POST",
            "/__admin/scenarios",
            json!({
                "request_path": "POST /api/*",
                "status_code": 202,
                "data": "{\"queued\":true}"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created: Value = serde_json::from_slice(&body).unwrap();
    let uuid = created["uuid"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &router,
        json_request("POST", "/api/users", json!({"id": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, br#"{"queued":true}"#);

    let (status, _, body) = send(
        &router,
        json_request(
            "PUT",
            &format!("/__admin/scenarios/{}", uuid),
            json!({"request_path": "POST /api/*", "status_code": 429}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let updated: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(updated["status_code"], 429);

    let (_, _, body) = send(&router, empty_request("GET", "/__admin/scenarios")).await;
    let listed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let uri = format!("/__admin/scenarios/{}", uuid);
    let (status, _, _) = send(&router, empty_request("DELETE", &uri)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&router, empty_request("GET", &uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&router, empty_request("GET", "/__admin/scenarios/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_scenario_rejected() {
    let router = router();
    let (status, _, body) = send(
        &router,
        json_request(
            "POST",
            "/__admin/scenarios",
            json!({"request_path": "FETCH /x", "status_code": 200}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"], "invalid_request");
}

#[tokio::test]
async fn test_admin_export_metrics_and_health() {
    let router = router();
    send(
        &router,
        json_request("POST", "/api/users", json!({"id": 1, "legacy": "one"})),
    )
    .await;

    let (status, _, body) = send(&router, empty_request("GET", "/__admin/resources")).await;
    assert_eq!(status, StatusCode::OK);
    let export: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(export["entries"].as_array().unwrap().len(), 2);
    assert!(export["exported_at"].is_string());

    let (_, _, body) = send(&router, empty_request("GET", "/__admin/metrics")).await;
    let metrics: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics["requests_total"], 1);
    assert_eq!(metrics["routes"]["/api/users/*"]["statuses"]["201"], 1);

    let (status, _, body) = send(&router, empty_request("GET", "/__admin/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, br#"{"status":"ok"}"#);
}

#[tokio::test]
async fn test_unmatched_path() {
    let router = router();
    let (status, _, body) = send(&router, empty_request("GET", "/nothing/here")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"], "not_found");
}
