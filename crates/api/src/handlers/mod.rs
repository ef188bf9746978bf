//! Request handlers.
//!
//! Each submodule provides the async handler functions for one area of the
//! surface. Handlers delegate to the [`Orchestrator`](yeepay_pipeline::Orchestrator)
//! or the registry and map errors via [`AppError`](crate::error::AppError).

pub mod generation;
pub mod history;
pub mod images;
pub mod registry;
pub mod system;
pub mod tasks;
pub mod upscale;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::{AppError, AppResult};

/// Unwrap a JSON body, reporting malformed input as `{detail}` like every
/// other validation failure.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}
