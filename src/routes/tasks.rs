//! Task Routes
//!
//! Endpoints:
//! - POST /api/v1/tasks - Create a task and run as much as the budget allows
//! - POST /api/v1/tasks/:task_id/advance - Run the next batch
//! - GET /api/v1/tasks/:task_id - Task progress
//! - POST /api/v1/required - Route a must-succeed set under one deadline

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::media::{MediaReference, Platform};
use crate::router::{route_required, Address, Payload, ProbeHints};
use crate::scheduler::{BatchReport, ProcessOutcome, TaskProgress};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub items: Vec<MediaReference>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub external_linkage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredRequest {
    pub items: Vec<MediaReference>,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Serialize)]
pub struct RequiredResponse {
    pub addresses: Vec<Address>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/:task_id", get(task_progress))
        .route("/tasks/:task_id/advance", post(advance_task))
        .route("/required", post(route_required_items))
}

/// POST /api/v1/tasks
async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<Json<ProcessOutcome>> {
    let outcome = state
        .scheduler()
        .process(request.items, request.platform, request.external_linkage)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/tasks/:task_id/advance
async fn advance_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<BatchReport>> {
    Ok(Json(state.scheduler().advance(&task_id).await?))
}

/// GET /api/v1/tasks/:task_id
async fn task_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskProgress>> {
    Ok(Json(state.scheduler().progress(&task_id).await?))
}

/// POST /api/v1/required
///
/// All-or-nothing: any failure or the deadline fails the whole request.
async fn route_required_items(
    State(state): State<AppState>,
    Json(request): Json<RequiredRequest>,
) -> Result<Json<RequiredResponse>> {
    if request.items.is_empty() {
        return Err(AppError::BadRequest("items must not be empty".to_string()));
    }

    let hints = ProbeHints {
        platform: request.platform,
        backup_urls: Vec::new(),
    };
    let items = request
        .items
        .into_iter()
        .map(|item| (item, Payload::Probe(hints.clone())))
        .collect();

    let addresses = route_required(
        state.router(),
        items,
        state.config().required_phase_timeout(),
    )
    .await?;

    Ok(Json(RequiredResponse { addresses }))
}
