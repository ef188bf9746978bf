use axum::routing::get;
use axum::Router;

use crate::handlers::system;
use crate::state::AppState;

/// ```text
/// GET    /queue    -> queue_status
/// GET    /health   -> dependency_health
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue", get(system::queue_status))
        .route("/health", get(system::dependency_health))
}
