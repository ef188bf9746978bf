//! Handlers for the generation submissions: plain, video and fusion.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use yeepay_core::request::{FusionRequest, GenerateRequest, VideoRequest};

use crate::error::AppResult;
use crate::handlers::json_body;
use crate::response::GenerateAccepted;
use crate::state::AppState;

/// POST /api/generate
///
/// Validate the request against the registry and queue a generation task.
/// Returns 201 with the task id; the task starts `pending` and the caller
/// polls `GET /api/task/{task_id}`. Unknown base models, incompatible LoRAs
/// and out-of-range values are rejected with 400 and nothing is persisted.
pub async fn submit_generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let task = state.orchestrator.submit_generate(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateAccepted {
            task_id: task.id,
            status: task.status,
            message: "Generation task queued".to_string(),
        }),
    ))
}

/// POST /api/generate-video
///
/// Animate `reference_image_path` on a video-capable base model. The task
/// completes with video URLs under `/api/image/{task_id}/`. Base models of
/// other families are rejected with `ModelTypeUnsupported`.
pub async fn submit_video(
    State(state): State<AppState>,
    payload: Result<Json<VideoRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let task = state.orchestrator.submit_video(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateAccepted {
            task_id: task.id,
            status: task.status,
            message: "Video generation task queued".to_string(),
        }),
    ))
}

/// POST /api/generate-image-fusion
///
/// Blend two or three uploaded images under one prompt.
pub async fn submit_fusion(
    State(state): State<AppState>,
    payload: Result<Json<FusionRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let task = state.orchestrator.submit_fusion(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateAccepted {
            task_id: task.id,
            status: task.status,
            message: "Fusion task queued".to_string(),
        }),
    ))
}
