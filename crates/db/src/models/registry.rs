//! Registry models: base models, LoRAs and workflow templates.
//!
//! These rows are maintained by the admin side and read-only here.

use serde::Serialize;
use sqlx::FromRow;
use yeepay_core::model::ModelType;
use yeepay_core::types::{DbId, Timestamp};

/// A row from the `base_models` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct BaseModel {
    pub id: DbId,
    pub code: String,
    pub name: String,
    pub display_name: String,
    #[sqlx(try_from = "String")]
    pub model_type: ModelType,
    pub unet_file: Option<String>,
    pub clip_file: Option<String>,
    pub vae_file: Option<String>,
    pub workflow_id: Option<DbId>,
    pub is_available: bool,
    pub is_default: bool,
    pub sort_order: i32,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `loras` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Lora {
    pub id: DbId,
    pub code: String,
    pub name: String,
    pub display_name: Option<String>,
    /// Code of the compatible base model.
    pub base_model: String,
    /// Weight file, relative to the engine's LoRA directory.
    pub file_path: String,
    pub trigger_word: Option<String>,
    pub is_available: bool,
    pub preview_image_path: Option<String>,
    pub sort_order: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `workflows` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct WorkflowTemplate {
    pub id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub workflow_json: serde_json::Value,
    pub is_available: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
