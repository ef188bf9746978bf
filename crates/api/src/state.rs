use std::sync::Arc;

use yeepay_db::catalog::Catalog;
use yeepay_pipeline::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Task pipeline; also owns the task store, engine client and paths.
    pub orchestrator: Orchestrator,
    /// Registry read-side (base models, LoRAs).
    pub catalog: Arc<dyn Catalog>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
