//! HTTP surface tests: status codes, both error body shapes, admin gating
//! and body limits, exercised through the full router with `oneshot`.

mod support;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use support::{body_json, json_request, multipart_request, zip_bytes, Harness};
use tower::ServiceExt;
use umlgate_api::constants::ADMIN_TOKEN_HEADER;
use umlgate_core::{UpstreamError, UpstreamResponse};
use umlgate_test_utils::analysis_at;

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn admin(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(ADMIN_TOKEN_HEADER, token);
    }
    builder.body(Body::empty()).unwrap()
}

fn plantuml_body() -> serde_json::Value {
    json!({"schema": analysis_at("abc123")["schema"], "diagram_type": "class"})
}

// ============================================================================
// ANALYZE
// ============================================================================

#[tokio::test]
async fn analyze_reports_the_answering_tier() {
    let harness = Harness::new();
    harness.upstream.respond_ok("acme/widgets", analysis_at("abc123"));
    let app = harness.router();
    let body = json!({"repositoryReference": "acme/widgets"});

    let response = app.clone().oneshot(json_request("POST", "/analyze", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-analysis-source"], "upstream");
    assert_eq!(body_json(response).await, analysis_at("abc123"));

    let response = app.oneshot(json_request("POST", "/analyze", &body)).await.unwrap();
    assert_eq!(response.headers()["x-analysis-source"], "memory");
    assert_eq!(harness.upstream.reference_calls(), 1);
}

#[tokio::test]
async fn analyze_validation_errors_use_the_envelope() {
    let harness = Harness::new();
    let app = harness.router();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/analyze", &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["type"], "VALIDATION");
    assert!(body["error"]["message"].is_string());
    assert!(body["error"]["timestamp"].is_string());

    let malformed = Request::post("/analyze")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(malformed).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "VALIDATION");
}

#[tokio::test]
async fn analyze_timeout_maps_to_408() {
    let harness = Harness::with_config(|config| config.with_upstream_timeout(Duration::from_millis(50)));
    harness
        .upstream
        .respond_ok("acme/widgets", analysis_at("abc123"))
        .with_delay(Duration::from_millis(400));

    let response = harness
        .router()
        .oneshot(json_request("POST", "/analyze", &json!({"githubUrl": "https://github.com/acme/widgets"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body_json(response).await["error"]["type"], "TIMEOUT");
}

#[tokio::test]
async fn multipart_archive_upload_is_analysed() {
    let harness = Harness::new();
    harness
        .upstream
        .respond_archive(Ok(UpstreamResponse::ok(analysis_at("abc123"))));

    let response = harness
        .router()
        .oneshot(multipart_request("repoZip", "widgets.zip", "application/zip", &zip_bytes()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.upstream.archive_calls(), 1);
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn multipart_spoofed_archive_is_rejected() {
    let harness = Harness::new();
    let response = harness
        .router()
        .oneshot(multipart_request("repoZip", "widgets.zip", "application/zip", b"#!/bin/sh\necho hi\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["type"], "VALIDATION");
    assert_eq!(harness.upstream.archive_calls(), 0);
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let harness = Harness::with_config(|config| config.with_max_upload_bytes(1024));
    let padding = "x".repeat(256 * 1024);
    let response = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/analyze",
            &json!({"repositoryReference": "acme/widgets", "padding": padding}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"]["type"], "PAYLOAD_TOO_LARGE");
    assert_eq!(harness.upstream.reference_calls(), 0);
}

#[tokio::test]
async fn snapshot_route_serves_cached_commits() {
    let harness = Harness::new();
    harness.upstream.respond_ok("acme/widgets", analysis_at("abc123"));
    let app = harness.router();

    let response = app.clone().oneshot(get("/analyze/acme/widgets/abc123")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["type"], "NOT_FOUND");

    app.clone()
        .oneshot(json_request("POST", "/analyze", &json!({"repositoryReference": "acme/widgets"})))
        .await
        .unwrap();

    let response = app.oneshot(get("/analyze/Acme/Widgets/abc123")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["meta"]["commit"], "abc123");
    assert_eq!(harness.upstream.reference_calls(), 1);
}

// ============================================================================
// GENERATE PLANTUML
// ============================================================================

#[tokio::test]
async fn plantuml_is_proxied() {
    let harness = Harness::new();
    harness
        .upstream
        .respond_plantuml(Ok(UpstreamResponse::ok(json!({"plantuml": "@startuml\n@enduml"}))));

    let response = harness
        .router()
        .oneshot(json_request("POST", "/generate-plantuml", &plantuml_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["plantuml"], "@startuml\n@enduml");
    assert_eq!(harness.upstream.plantuml_calls(), 1);
}

#[tokio::test]
async fn plantuml_errors_use_the_simple_shape() {
    let harness = Harness::new();
    let response = harness
        .router()
        .oneshot(json_request("POST", "/generate-plantuml", &json!({"schema": {}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
    assert!(body.get("success").is_none());
    assert_eq!(harness.upstream.plantuml_calls(), 0);
}

#[tokio::test]
async fn plantuml_upstream_failure_uses_the_simple_shape() {
    let harness = Harness::new();
    harness.upstream.respond_plantuml(Err(UpstreamError::Unavailable {
        endpoint: "mock://analysis-service".to_string(),
        reason: "connection refused".to_string(),
    }));

    let response = harness
        .router()
        .oneshot(json_request("POST", "/generate-plantuml", &plantuml_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn plantuml_rate_limit_keeps_retry_after_in_simple_shape() {
    let harness = Harness::with_config(|config| config.with_rate_limit(1, Duration::from_secs(60)));
    harness
        .upstream
        .respond_plantuml(Ok(UpstreamResponse::ok(json!({"plantuml": "@startuml\n@enduml"}))));
    let app = harness.router();

    let first = app
        .clone()
        .oneshot(json_request("POST", "/generate-plantuml", &plantuml_body()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(json_request("POST", "/generate-plantuml", &plantuml_body()))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
    assert!(body_json(second).await["error"].is_string());
}

// ============================================================================
// HEALTH
// ============================================================================

#[tokio::test]
async fn health_is_healthy_when_service_listens() {
    let harness = Harness::new();
    let response = harness.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["upstream"]["reachable"], true);
}

#[tokio::test]
async fn health_is_degraded_when_service_is_down() {
    let harness = Harness::with_service_down(|config| config);
    let response = harness.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["upstream"]["reachable"], false);
    assert!(body["upstream"]["error"].is_string());
}

// ============================================================================
// ADMIN
// ============================================================================

#[tokio::test]
async fn admin_routes_are_hidden_without_a_token() {
    let harness = Harness::new();
    let app = harness.router();
    for (method, uri) in [
        ("GET", "/admin/cache/info"),
        ("POST", "/admin/cache/purge"),
        ("POST", "/admin/service/reset"),
    ] {
        let response = app.clone().oneshot(admin(method, uri, Some("anything"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn admin_routes_check_the_token() {
    let harness = Harness::with_config(|config| config.with_admin_token("s3cret"));
    let app = harness.router();

    let response = app.clone().oneshot(admin("GET", "/admin/cache/info", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(admin("GET", "/admin/cache/info", Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"]["type"], "AUTHORIZATION");

    let response = app.oneshot(admin("GET", "/admin/cache/info", Some("s3cret"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["cache"]["memory_max_entries"], 100);
    assert!(body["upstream"]["state"].is_string());
}

#[tokio::test]
async fn admin_purge_empties_both_tiers() {
    let harness = Harness::with_config(|config| config.with_admin_token("s3cret"));
    harness.upstream.respond_ok("acme/widgets", analysis_at("abc123"));
    let app = harness.router();
    let analyze = json!({"repositoryReference": "acme/widgets"});

    app.clone().oneshot(json_request("POST", "/analyze", &analyze)).await.unwrap();

    let response = app
        .clone()
        .oneshot(admin("POST", "/admin/cache/purge", Some("s3cret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    // Alias plus the abc123 snapshot.
    assert_eq!(report["memory_entries"], 2);
    assert_eq!(report["disk_files"], 2);

    let response = app.oneshot(json_request("POST", "/analyze", &analyze)).await.unwrap();
    assert_eq!(response.headers()["x-analysis-source"], "upstream");
    assert_eq!(harness.upstream.reference_calls(), 2);
}

#[tokio::test]
async fn admin_service_reset_reports_state() {
    let harness = Harness::with_config(|config| config.with_admin_token("s3cret"));
    let response = harness
        .router()
        .oneshot(admin("POST", "/admin/service/reset", Some("s3cret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["cleared"], false);
    assert_eq!(body["upstream"]["state"], "idle");
}

#[tokio::test]
async fn unknown_route_is_an_envelope_404() {
    let harness = Harness::new();
    let response = harness.router().oneshot(get("/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["success"], false);
}
