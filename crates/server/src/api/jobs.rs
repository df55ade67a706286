//! Job status polling endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use gantry_core::JobInfo;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Owner whose jobs to list.
    pub user: String,
}

/// List a user's observable jobs.
///
/// Jobs whose terminal status is returned by this call are pruned from the
/// registry: a finished job is delivered exactly once.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Json<Vec<JobInfo>> {
    Json(state.registry().jobs_for_user(&query.user).await)
}

/// Poll a single job by id without consuming it.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, (StatusCode, Json<Value>)> {
    match state.registry().find(&id).await {
        Some(info) => Ok(Json(info)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("job not found: {}", id)})),
        )),
    }
}
