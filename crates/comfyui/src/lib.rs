//! HTTP adapter to the remote ComfyUI engine.
//!
//! [`api::ComfyUIApi`] talks to the engine; [`engine::Engine`] is the seam
//! the orchestrator depends on, so tests can script engine behaviour.

pub mod api;
pub mod engine;
pub mod history;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use engine::Engine;
pub use history::{HistoryEntry, HistoryStatus, OutputFile, QueueSnapshot};
