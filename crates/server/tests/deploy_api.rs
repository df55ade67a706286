//! E2E tests for the deployment trigger and job polling API.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::TestFixture;

/// An upload-only deployment: no compute spec and no wire targets, so the
/// job builds the bundle, ships it to object storage and finishes.
fn upload_only_request() -> serde_json::Value {
    json!({
        "deployment": {
            "id": "dep-1",
            "name": "Spring 2026",
            "project_id": "proj-1",
            "project_name": "Metro Transit",
            "feed_paths": [],
            "build_config": {"transitServiceStart": "2026-01-01"},
            "router_config": {"routingDefaults": {}}
        },
        "target": {
            "id": "srv-1",
            "name": "production",
            "bucket": "deploy-bucket"
        },
        "requested_by": {"user_id": "user-1", "email": "user@example.com"}
    })
}

async fn wait_for_completion(fixture: &TestFixture, job_id: &str) -> serde_json::Value {
    for _ in 0..100 {
        let (status, body) = fixture.get(&format!("/api/v1/jobs/{}", job_id)).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"]["completed"].as_bool() == Some(true) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not complete", job_id);
}

#[tokio::test]
async fn test_deployment_submission_returns_job_id_and_completes() {
    let fixture = TestFixture::new();

    let (status, body) = fixture.post("/api/v1/deployments", upload_only_request()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().expect("job id").to_string();

    let job = wait_for_completion(&fixture, &job_id).await;
    assert_eq!(job["status"]["error"].as_bool(), Some(false));
    assert_eq!(job["owner"].as_str(), Some("user-1"));
    assert_eq!(job["job_type"].as_str(), Some("deploy"));

    // The bundle and its -latest alias landed in object storage.
    let keys = fixture.cloud.store.keys("deploy-bucket").await;
    assert!(
        keys.iter().any(|k| k.ends_with("/bundle.zip")),
        "bundle missing from {:?}",
        keys
    );
    assert!(
        keys.contains(&"bundles/proj-1/metro-transit-latest.zip".to_string()),
        "latest alias missing from {:?}",
        keys
    );
}

#[tokio::test]
async fn test_deployment_history_is_recorded() {
    let fixture = TestFixture::new();

    let (_, body) = fixture.post("/api/v1/deployments", upload_only_request()).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    wait_for_completion(&fixture, &job_id).await;

    let (status, summaries) = fixture
        .get("/api/v1/deployments/dep-1/summaries")
        .await;
    assert_eq!(status, StatusCode::OK);
    let summaries = summaries.as_array().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["deployment_id"].as_str(), Some("dep-1"));
    assert_eq!(summaries[0]["status"]["error"].as_bool(), Some(false));
}

#[tokio::test]
async fn test_jobs_for_user_delivers_terminal_status_once() {
    let fixture = TestFixture::new();

    let (_, body) = fixture.post("/api/v1/deployments", upload_only_request()).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    wait_for_completion(&fixture, &job_id).await;

    let (status, jobs) = fixture.get("/api/v1/jobs?user=user-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);

    // Terminal status was delivered; the job is pruned.
    let (_, jobs) = fixture.get("/api/v1/jobs?user=user-1").await;
    assert!(jobs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_returns_not_found() {
    let fixture = TestFixture::new();
    let (status, body) = fixture.get("/api/v1/jobs/no-such-job").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("no-such-job"));
}

#[tokio::test]
async fn test_deployment_rejected_without_cloud_backend() {
    let fixture = TestFixture::without_cloud();

    let (status, body) = fixture.post("/api/v1/deployments", upload_only_request()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("no cloud backend configured"));
}

#[tokio::test]
async fn test_deployment_with_empty_owner_is_rejected() {
    let fixture = TestFixture::new();

    let mut request = upload_only_request();
    request["requested_by"]["user_id"] = json!("");
    let (status, body) = fixture.post("/api/v1/deployments", request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("owner"));
}
