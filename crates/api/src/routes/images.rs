use axum::routing::get;
use axum::Router;

use crate::handlers::images;
use crate::state::AppState;

/// Routes mounted at `/image`.
///
/// ```text
/// GET    /{task_id}              -> primary_image
/// GET    /{task_id}/{file}       -> task_image (file name or output index)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{task_id}", get(images::primary_image))
        .route("/{task_id}/{file}", get(images::task_image))
}
