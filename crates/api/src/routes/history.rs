use axum::routing::get;
use axum::Router;

use crate::handlers::history;
use crate::state::AppState;

/// ```text
/// GET    /history     -> list_history
/// GET    /favorites   -> list_favorites
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/history", get(history::list_history))
        .route("/favorites", get(history::list_favorites))
}
