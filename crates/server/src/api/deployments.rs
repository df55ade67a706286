//! Deployment trigger and history endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use gantry_core::{
    DeployJob, DeploySummary, DeployTarget, DeployType, DeploymentSpec, JobOwner,
};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub deployment: DeploymentSpec,
    pub target: DeployTarget,
    #[serde(default = "default_deploy_type")]
    pub deploy_type: DeployType,
    /// Identity the deploy job is attributed to. Authentication is handled
    /// upstream of this service.
    pub requested_by: Requester,
}

fn default_deploy_type() -> DeployType {
    DeployType::Replace
}

#[derive(Debug, Deserialize)]
pub struct Requester {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub job_id: String,
}

/// Construct a deploy job from the request and submit it; returns
/// immediately with the job id used for later polling.
pub async fn create_deployment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeployRequest>,
) -> Result<(StatusCode, Json<DeployResponse>), (StatusCode, Json<Value>)> {
    let Some(cloud) = state.cloud() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "no cloud backend configured"})),
        ));
    };

    let owner = JobOwner::new(request.requested_by.user_id, request.requested_by.email);
    let deploy = DeployJob::new(
        request.deployment,
        request.target,
        request.deploy_type,
        owner,
        state.config().deploy.clone(),
        cloud.clone(),
        Some(state.history()),
    );
    let job = deploy
        .into_job()
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))))?;

    let job_id = state.registry().submit(job).await;
    info!("Accepted deployment job {}", job_id);
    Ok((StatusCode::ACCEPTED, Json(DeployResponse { job_id })))
}

#[derive(Debug, Deserialize)]
pub struct SummariesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Deployment history, most recent first.
pub async fn list_summaries(
    State(state): State<Arc<AppState>>,
    Path(deployment_id): Path<String>,
    Query(query): Query<SummariesQuery>,
) -> Result<Json<Vec<DeploySummary>>, (StatusCode, Json<Value>)> {
    state
        .history()
        .for_deployment(&deployment_id, query.limit)
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        })
}
