use axum::routing::get;
use axum::Router;

use crate::handlers::registry;
use crate::state::AppState;

/// ```text
/// GET    /models   -> list_models
/// GET    /loras    -> list_loras
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/models", get(registry::list_models))
        .route("/loras", get(registry::list_loras))
}
