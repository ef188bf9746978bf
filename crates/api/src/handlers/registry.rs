//! Registry read-side: base models and LoRAs.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use yeepay_db::catalog::Catalog;

use crate::error::AppResult;
use crate::query::LoraParams;
use crate::state::AppState;

/// GET /api/models
///
/// Available base models ordered by `sort_order`.
pub async fn list_models(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let models = state.catalog.base_models(true).await?;
    Ok(Json(json!({ "models": models })))
}

/// GET /api/loras?base_model=
pub async fn list_loras(
    State(state): State<AppState>,
    Query(params): Query<LoraParams>,
) -> AppResult<impl IntoResponse> {
    let base_model = params.base_model.as_deref().filter(|b| !b.is_empty());
    let loras = state.catalog.loras(base_model).await?;
    Ok(Json(json!({ "loras": loras })))
}
