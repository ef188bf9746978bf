use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use yeepay_comfyui::ComfyUIApiError;
use yeepay_core::error::CoreError;
use yeepay_db::store::StoreError;
use yeepay_pipeline::OrchestratorError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce `{"detail", "code"}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `yeepay_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A submission or task action refused by the orchestrator.
    #[error(transparent)]
    Pipeline(#[from] OrchestratorError),

    /// A task store or registry failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The engine could not be reached or refused the call.
    #[error(transparent)]
    Engine(#[from] ComfyUIApiError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

/// Status, machine code and `detail` of an error response.
type Classified = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut message = None;
        let (status, code, detail) = match &self {
            AppError::Core(core) => classify_core_error(core),

            AppError::Pipeline(err) => match err {
                OrchestratorError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                // The reason is the stable detail; the message explains it.
                OrchestratorError::Rejected(e) => {
                    message = Some(e.message.clone());
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.reason.to_string())
                }
                OrchestratorError::NotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Task {id} not found"),
                ),
                OrchestratorError::Store(e) => classify_store_error(e),
                OrchestratorError::Io(e) => internal("I/O error", e),
            },

            AppError::Store(e) => classify_store_error(e),

            AppError::Engine(e) => {
                tracing::warn!(error = %e, "Engine call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "ENGINE_UNAVAILABLE",
                    "The image engine is unavailable".to_string(),
                )
            }

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal("Internal error", msg),
        };

        let mut body = json!({
            "detail": detail,
            "code": code,
        });
        if let Some(message) = message {
            body["message"] = json!(message);
        }

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} '{id}' not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => internal("Internal core error", msg),
    }
}

fn classify_store_error(err: &StoreError) -> Classified {
    match err {
        StoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Task {id} not found"),
        ),
        StoreError::InvalidTransition { .. } | StoreError::TaskActive { .. } => {
            (StatusCode::CONFLICT, "CONFLICT", err.to_string())
        }
        StoreError::Database(db) => classify_sqlx_error(db),
        other => internal("Task store error", other),
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> Classified {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            internal("Database error", db_err)
        }
        other => internal("Database error", other),
    }
}

fn internal(context: &'static str, err: impl std::fmt::Display) -> Classified {
    tracing::error!(error = %err, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
