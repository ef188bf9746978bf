//! Route definitions for the `/upscale` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{images, upscale};
use crate::state::AppState;

/// Routes mounted at `/upscale`.
///
/// ```text
/// POST   /                            -> submit_upscale
/// POST   /batch                       -> submit_batch
/// GET    /algorithms                  -> list_algorithms
/// GET    /{task_id}                   -> get_upscale
/// GET    /image/{task_id}/{filename}  -> upscale_image
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upscale::submit_upscale))
        .route("/batch", post(upscale::submit_batch))
        .route("/algorithms", get(upscale::list_algorithms))
        .route("/{task_id}", get(upscale::get_upscale))
        .route("/image/{task_id}/{filename}", get(images::upscale_image))
}
