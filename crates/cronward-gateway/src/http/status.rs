use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cronward_scheduler::JobSummary;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// `/` with any method: daemon name and number of registered jobs.
pub async fn index_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": state.name(),
        "number_of_jobs": state.status.job_count(),
    }))
}

/// GET /jobs: `[{id, name}]` in registration order.
pub async fn jobs_handler(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    Json(state.status.list_jobs())
}

/// GET /jobs/{name}: schedule, state and run times of one job.
pub async fn job_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.status.job(&name) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found().await.into_response(),
    }
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
