//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps prompt submission, history and queue lookups and the health check
//! using [`reqwest`]. The client keeps no state between calls.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::history::{HistoryStatus, QueueSnapshot};

/// Upper bound for the health check.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    client_id: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request to ComfyUI failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI rejected the request ({status}): {body}")]
    EngineRejected {
        /// HTTP status code.
        status: u16,
        /// The engine's message, or the raw body when it has none.
        body: String,
    },

    /// The engine answered 2xx with a body we could not interpret.
    #[error("Unexpected ComfyUI response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with `{prompt, client_id}` and returns the
    /// engine-assigned prompt id.
    pub async fn submit(&self, prompt: &Value) -> Result<String, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        tracing::debug!(
            prompt_id = %submitted.prompt_id,
            queue_number = submitted.number,
            "Prompt queued on ComfyUI",
        );
        Ok(submitted.prompt_id)
    }

    /// Look up the execution history of a prompt.
    ///
    /// A non-2xx answer is a soft failure reported as
    /// [`HistoryStatus::Unknown`]; only transport and decode problems are
    /// errors.
    pub async fn history(&self, prompt_id: &str) -> Result<HistoryStatus, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(
                prompt_id,
                status = response.status().as_u16(),
                "ComfyUI history lookup returned non-success status",
            );
            return Ok(HistoryStatus::Unknown);
        }

        let body: Value = serde_json::from_slice(&response.bytes().await?)?;
        Ok(HistoryStatus::from_body(prompt_id, &body)?)
    }

    /// Snapshot of the engine queue. Any failure yields empty lists.
    pub async fn queue(&self) -> QueueSnapshot {
        match self.fetch_queue().await {
            Ok(body) => QueueSnapshot::from_body(&body),
            Err(e) => {
                tracing::warn!(error = %e, "ComfyUI queue lookup failed");
                QueueSnapshot::default()
            }
        }
    }

    /// Check `GET /` with a short timeout. Never fails.
    pub async fn healthy(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/", self.api_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "ComfyUI health check failed");
                false
            }
        }
    }

    // ---- private helpers ----

    async fn fetch_queue(&self) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or [`ComfyUIApiError::EngineRejected`]
    /// carrying the engine's message on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::EngineRejected {
                status: status.as_u16(),
                body: engine_message(&body),
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Pull the human-readable message out of an engine error body.
///
/// The engine answers validation failures with
/// `{"error": {"message", "details"}, "node_errors": {...}}`; anything else
/// is returned as-is.
fn engine_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let Some(error) = json.get("error") else {
        return body.trim().to_string();
    };
    if let Some(text) = error.as_str() {
        return text.to_string();
    }
    let message = error.get("message").and_then(Value::as_str).unwrap_or("");
    let details = error.get("details").and_then(Value::as_str).unwrap_or("");
    match (message.is_empty(), details.is_empty()) {
        (false, false) => format!("{message}: {details}"),
        (false, true) => message.to_string(),
        (true, false) => details.to_string(),
        (true, true) => body.trim().to_string(),
    }
}
