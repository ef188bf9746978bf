//! Engine queue passthrough and dependency health.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use yeepay_comfyui::Engine;
use yeepay_core::types::Timestamp;
use yeepay_db::store::TaskStore;

use crate::state::AppState;

/// GET /api/queue
///
/// Prompt ids the engine is running and holding. An unreachable engine
/// reports an empty queue.
pub async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.orchestrator.engine().queue().await;
    Json(serde_json::json!({
        "running_count": snapshot.running.len(),
        "pending_count": snapshot.pending.len(),
        "queue_running": snapshot.running,
        "queue_pending": snapshot.pending,
    }))
}

/// Dependency health payload.
#[derive(Debug, Serialize)]
pub struct DependencyHealth {
    /// `healthy` when every dependency answers, `degraded` otherwise.
    pub status: &'static str,
    pub database_connected: bool,
    pub comfyui_connected: bool,
    pub timestamp: Timestamp,
}

/// GET /api/health
pub async fn dependency_health(State(state): State<AppState>) -> Json<DependencyHealth> {
    let (database_connected, comfyui_connected) = tokio::join!(
        state.orchestrator.store().ping(),
        state.orchestrator.engine().healthy(),
    );
    let status = if database_connected && comfyui_connected {
        "healthy"
    } else {
        "degraded"
    };

    Json(DependencyHealth {
        status,
        database_connected,
        comfyui_connected,
        timestamp: Utc::now(),
    })
}
