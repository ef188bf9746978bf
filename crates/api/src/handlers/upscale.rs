//! Handlers for the `/api/upscale` resource.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use validator::Validate;
use yeepay_core::error::CoreError;
use yeepay_core::model::UpscaleAlgorithm;
use yeepay_core::request::{BatchUpscaleRequest, UpscaleRequest};
use yeepay_core::types::TaskId;
use yeepay_pipeline::OrchestratorError;

use crate::error::{AppError, AppResult};
use crate::handlers::json_body;
use crate::response::{
    BatchFailure, BatchItem, BatchUpscaleResponse, UpscaleAccepted, UpscaleView,
};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/upscale
///
/// Queue an upscale of an uploaded image. `scale_factor` must lie in
/// `[1, 4]`; only algorithms backed by a workflow are accepted.
pub async fn submit_upscale(
    State(state): State<AppState>,
    payload: Result<Json<UpscaleRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let scale_factor = input.check_scale().map_err(OrchestratorError::from)?;
    let algorithm = input.algorithm;

    let task = state.orchestrator.submit_upscale(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(UpscaleAccepted {
            task_id: task.id,
            status: task.status,
            message: format!("Upscale task queued: x{scale_factor} using {algorithm}"),
            scale_factor,
            algorithm,
        }),
    ))
}

/// POST /api/upscale/batch
///
/// Queue one upscale task per image path. Images that fail validation are
/// reported individually; the rest are still queued.
pub async fn submit_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchUpscaleRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let input = json_body(payload)?;
    input.validate().map_err(OrchestratorError::from)?;

    let requests = input.into_requests();
    let total = requests.len();
    let mut submitted = Vec::new();
    let mut failed = Vec::new();

    for request in requests {
        let image_path = request.image_path.clone();
        match state.orchestrator.submit_upscale(request).await {
            Ok(task) => submitted.push(BatchItem {
                image_path,
                task_id: task.id,
            }),
            Err(e) => {
                tracing::warn!(image_path = %image_path, error = %e, "Batch upscale item refused");
                failed.push(BatchFailure {
                    image_path,
                    detail: failure_detail(&e),
                });
            }
        }
    }

    tracing::info!(total, submitted = submitted.len(), "Batch upscale queued");

    Ok((
        StatusCode::CREATED,
        Json(BatchUpscaleResponse {
            submitted,
            failed,
            total,
        }),
    ))
}

fn failure_detail(err: &OrchestratorError) -> String {
    match err {
        OrchestratorError::Rejected(e) => e.reason.to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/upscale/algorithms
pub async fn list_algorithms() -> impl IntoResponse {
    Json(json!({ "algorithms": UpscaleAlgorithm::catalog() }))
}

/// GET /api/upscale/{task_id}
///
/// Upscale-specific view of a task. 404 for generation tasks.
pub async fn get_upscale(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let task = state.orchestrator.get(task_id).await?;
    let view = UpscaleView::from_task(task)
        .ok_or_else(|| AppError::Core(CoreError::not_found("Upscale task", task_id)))?;
    Ok(Json(view))
}
