//! The engine seam used by the orchestrator.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{HistoryStatus, QueueSnapshot};

/// Operations the pipeline needs from the remote engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Queue a prompt graph, returning the engine-assigned prompt id.
    async fn submit(&self, prompt: &Value) -> Result<String, ComfyUIApiError>;

    /// Look up the execution state of a prompt.
    async fn history(&self, prompt_id: &str) -> Result<HistoryStatus, ComfyUIApiError>;

    /// Current engine queue; empty on failure.
    async fn queue(&self) -> QueueSnapshot;

    /// Whether the engine answers at all.
    async fn healthy(&self) -> bool;
}

#[async_trait]
impl Engine for ComfyUIApi {
    async fn submit(&self, prompt: &Value) -> Result<String, ComfyUIApiError> {
        ComfyUIApi::submit(self, prompt).await
    }

    async fn history(&self, prompt_id: &str) -> Result<HistoryStatus, ComfyUIApiError> {
        ComfyUIApi::history(self, prompt_id).await
    }

    async fn queue(&self) -> QueueSnapshot {
        ComfyUIApi::queue(self).await
    }

    async fn healthy(&self) -> bool {
        ComfyUIApi::healthy(self).await
    }
}
