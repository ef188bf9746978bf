//! Handlers for the `/api/task/{task_id}` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use yeepay_core::types::TaskId;
use yeepay_db::store::TaskStore;

use crate::error::AppResult;
use crate::response::TaskView;
use crate::state::AppState;

/// GET /api/task/{task_id}
///
/// Full task view, including the advisory engine queue position.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let task = state.orchestrator.get(task_id).await?;
    let position = state.orchestrator.queue_position(&task);
    Ok(Json(TaskView::new(task, position)))
}

/// GET /api/task/{task_id}/events
pub async fn list_events(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    state.orchestrator.get(task_id).await?;
    let events = state.orchestrator.store().events(task_id).await?;
    Ok(Json(json!({ "task_id": task_id, "events": events })))
}

/// POST /api/task/{task_id}/favorite
pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let task = state.orchestrator.toggle_favorite(task_id).await?;
    tracing::info!(task_id = %task_id, is_favorited = task.is_favorited, "Favorite toggled");
    Ok(Json(json!({ "task_id": task_id, "is_favorited": task.is_favorited })))
}

/// POST /api/task/{task_id}/cancel
///
/// 409 if the task already finished.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let task = state.orchestrator.cancel(task_id).await?;
    Ok(Json(TaskView::new(task, None)))
}

/// DELETE /api/task/{task_id}
///
/// Remove a finished task and its outputs. 409 while it is still active.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    state.orchestrator.delete(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
