//! Basic router surface tests: health, config and metrics endpoints.

mod common;

use axum::http::StatusCode;

use common::TestFixture;

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new();
    let (status, body) = fixture.get("/api/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("ok"));
}

#[tokio::test]
async fn test_config_endpoint_returns_defaults() {
    let fixture = TestFixture::new();
    let (status, body) = fixture.get("/api/v1/config").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server"]["port"].as_u64(), Some(8080));
    assert_eq!(body["deploy"]["bundle_prefix"].as_str(), Some("bundles"));
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let fixture = TestFixture::new();
    let (status, body) = fixture.get("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().expect("text body");
    assert!(text.contains("gantry_jobs_observable"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let fixture = TestFixture::new();
    let (status, _) = fixture.get("/api/v1/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
