//! Route definitions for the `/task` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/task`.
///
/// ```text
/// GET    /{task_id}            -> get_task
/// DELETE /{task_id}            -> delete_task
/// GET    /{task_id}/events     -> list_events
/// POST   /{task_id}/favorite   -> toggle_favorite
/// POST   /{task_id}/cancel     -> cancel_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{task_id}", get(tasks::get_task).delete(tasks::delete_task))
        .route("/{task_id}/events", get(tasks::list_events))
        .route("/{task_id}/favorite", post(tasks::toggle_favorite))
        .route("/{task_id}/cancel", post(tasks::cancel_task))
}
