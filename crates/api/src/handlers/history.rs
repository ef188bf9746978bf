//! Handlers for task listings.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use yeepay_db::store::TaskStore;

use crate::error::AppResult;
use crate::query::HistoryParams;
use crate::response::{HistoryResponse, TaskView};
use crate::state::AppState;

/// GET /api/history?limit&offset&order&task_type&status
pub async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> AppResult<impl IntoResponse> {
    list(&state, params, false).await
}

/// GET /api/favorites?limit&offset&order
pub async fn list_favorites(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> AppResult<impl IntoResponse> {
    list(&state, params, true).await
}

async fn list(
    state: &AppState,
    params: HistoryParams,
    favorites_only: bool,
) -> AppResult<Json<HistoryResponse>> {
    let query = params.into_query(favorites_only);
    let store = state.orchestrator.store();
    let tasks = store.list(&query).await?;
    let total = store.count(&query).await?;

    let tasks = tasks
        .into_iter()
        .map(|task| {
            let position = state.orchestrator.queue_position(&task);
            TaskView::new(task, position)
        })
        .collect();

    Ok(Json(HistoryResponse {
        tasks,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}
