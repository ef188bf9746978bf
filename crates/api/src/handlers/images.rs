//! Serving relocated outputs from `<output_dir>/<task_id>/`.

use std::path::{Path as FsPath, PathBuf};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use tokio_util::io::ReaderStream;
use yeepay_core::error::CoreError;
use yeepay_core::types::TaskId;
use yeepay_core::urls::is_plain_filename;

use crate::error::{AppError, AppResult};
use crate::response::derived_image_urls;
use crate::state::AppState;

/// GET /api/image/{task_id}
///
/// The primary output (`result_path`) of a completed task.
pub async fn primary_image(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> AppResult<Response> {
    let task = state.orchestrator.get(task_id).await?;
    let result_path = task
        .result_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Core(CoreError::not_found("Image for task", task_id)))?;
    serve_file(&state.orchestrator.config().output_dir.join(result_path)).await
}

/// GET /api/image/{task_id}/{file}
///
/// `file` is either an output file name or a zero-based index into the
/// task's `image_urls`.
pub async fn task_image(
    State(state): State<AppState>,
    Path((task_id, file)): Path<(TaskId, String)>,
) -> AppResult<Response> {
    let filename = match file.parse::<usize>() {
        Ok(index) => indexed_filename(&state, task_id, index).await?,
        Err(_) => file,
    };
    let path = output_path(&state, task_id, &filename)?;
    serve_file(&path).await
}

/// File name behind the `index`-th URL of a task.
async fn indexed_filename(state: &AppState, task_id: TaskId, index: usize) -> AppResult<String> {
    let task = state.orchestrator.get(task_id).await?;
    derived_image_urls(&task)
        .get(index)
        .and_then(|url| url.rsplit('/').next())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::Core(CoreError::not_found(
                "Image",
                format!("{task_id} #{index}"),
            ))
        })
}

/// GET /api/upscale/image/{task_id}/{filename}
pub async fn upscale_image(
    State(state): State<AppState>,
    Path((task_id, filename)): Path<(TaskId, String)>,
) -> AppResult<Response> {
    let path = output_path(&state, task_id, &filename)?;
    serve_file(&path).await
}

fn output_path(state: &AppState, task_id: TaskId, filename: &str) -> AppResult<PathBuf> {
    if !is_plain_filename(filename) {
        return Err(AppError::BadRequest(format!("Invalid file name '{filename}'")));
    }
    Ok(state
        .orchestrator
        .config()
        .output_dir
        .join(task_id.to_string())
        .join(filename))
}

/// Stream a file with a content type guessed from its suffix.
async fn serve_file(path: &FsPath) -> AppResult<Response> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            return Err(AppError::Core(CoreError::not_found(
                "Image",
                name.unwrap_or_default(),
            )));
        }
        Err(e) => return Err(AppError::InternalError(e.to_string())),
    };
    let len = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for_extension(path))
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=86400"),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

/// Guess a Content-Type from a file extension.
fn content_type_for_extension(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
