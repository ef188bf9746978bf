//! Read-only registry seam: base models, LoRAs and workflow templates.

use async_trait::async_trait;
use yeepay_core::types::DbId;

use crate::models::registry::{BaseModel, Lora, WorkflowTemplate};
use crate::store::StoreError;

pub mod memory;
pub mod pg;

pub use memory::MemoryCatalog;
pub use pg::PgCatalog;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn base_model(&self, code: &str) -> Result<Option<BaseModel>, StoreError>;

    /// Base models ordered by `sort_order`.
    async fn base_models(&self, available_only: bool) -> Result<Vec<BaseModel>, StoreError>;

    /// Look a LoRA up by code, or by name when no code matches.
    async fn lora(&self, code: &str) -> Result<Option<Lora>, StoreError>;

    /// Available LoRAs, optionally for one base model only.
    async fn loras(&self, base_model: Option<&str>) -> Result<Vec<Lora>, StoreError>;

    /// Every LoRA with a preview image, available or not.
    async fn loras_with_previews(&self) -> Result<Vec<Lora>, StoreError>;

    async fn workflow(&self, id: DbId) -> Result<Option<WorkflowTemplate>, StoreError>;

    async fn workflow_by_name(&self, name: &str) -> Result<Option<WorkflowTemplate>, StoreError>;
}
