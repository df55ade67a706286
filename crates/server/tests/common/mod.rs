//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock cloud dependencies injected, enabling comprehensive E2E
//! testing without external infrastructure.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use gantry_core::testing::fixtures::MockCloud;
use gantry_core::{Config, DeployHistoryStore, JobRegistry, SqliteHistoryStore};
use gantry_server::api::create_router;
use gantry_server::state::AppState;

/// Test fixture for E2E testing with mock cloud dependencies.
//
// Not every test file uses every helper.
#[allow(dead_code)]
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock cloud - configure compute/storage/balancer/probe behavior
    pub cloud: MockCloud,
    /// Job registry shared with the server
    pub registry: Arc<JobRegistry>,
    /// Deployment history store shared with the server
    pub history: Arc<SqliteHistoryStore>,
}

#[allow(dead_code)]
impl TestFixture {
    /// Fixture with a wired mock cloud backend.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Fixture without any cloud backend, as when none is configured.
    pub fn without_cloud() -> Self {
        Self::build(false)
    }

    fn build(with_cloud: bool) -> Self {
        let cloud = MockCloud::new();
        let registry = Arc::new(JobRegistry::new());
        let history = Arc::new(SqliteHistoryStore::in_memory().expect("history store"));

        let state = Arc::new(AppState::new(
            Config::default(),
            Arc::clone(&registry),
            Arc::clone(&history) as Arc<dyn DeployHistoryStore>,
            with_cloud.then(|| cloud.services()),
        ));

        Self {
            router: create_router(state),
            cloud,
            registry,
            history,
        }
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        Self::read_response(response).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        Self::read_response(response).await
    }

    async fn read_response(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, value)
    }
}
