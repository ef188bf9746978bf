//! In-memory [`Catalog`] built up front and read-only afterwards.

use async_trait::async_trait;
use chrono::Utc;
use yeepay_core::model::ModelType;
use yeepay_core::types::DbId;

use crate::catalog::Catalog;
use crate::models::registry::{BaseModel, Lora, WorkflowTemplate};
use crate::store::StoreError;

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    base_models: Vec<BaseModel>,
    loras: Vec<Lora>,
    workflows: Vec<WorkflowTemplate>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_model(mut self, model: BaseModel) -> Self {
        self.base_models.push(model);
        self
    }

    pub fn with_lora(mut self, lora: Lora) -> Self {
        self.loras.push(lora);
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowTemplate) -> Self {
        self.workflows.push(workflow);
        self
    }

    /// Convenience constructor for a workflow row.
    pub fn workflow_row(id: DbId, name: &str, workflow_json: serde_json::Value) -> WorkflowTemplate {
        let now = Utc::now();
        WorkflowTemplate {
            id,
            name: name.to_string(),
            description: None,
            workflow_json,
            is_available: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convenience constructor for an available base model row.
    pub fn base_model_row(
        id: DbId,
        code: &str,
        model_type: ModelType,
        workflow_id: Option<DbId>,
    ) -> BaseModel {
        let now = Utc::now();
        BaseModel {
            id,
            code: code.to_string(),
            name: code.to_string(),
            display_name: code.to_string(),
            model_type,
            unet_file: None,
            clip_file: None,
            vae_file: None,
            workflow_id,
            is_available: true,
            is_default: false,
            sort_order: id as i32,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convenience constructor for an available LoRA row.
    pub fn lora_row(id: DbId, code: &str, base_model: &str, file_path: &str) -> Lora {
        let now = Utc::now();
        Lora {
            id,
            code: code.to_string(),
            name: code.to_string(),
            display_name: None,
            base_model: base_model.to_string(),
            file_path: file_path.to_string(),
            trigger_word: None,
            is_available: true,
            preview_image_path: None,
            sort_order: id as i32,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn base_model(&self, code: &str) -> Result<Option<BaseModel>, StoreError> {
        Ok(self.base_models.iter().find(|m| m.code == code).cloned())
    }

    async fn base_models(&self, available_only: bool) -> Result<Vec<BaseModel>, StoreError> {
        let mut models: Vec<BaseModel> = self
            .base_models
            .iter()
            .filter(|m| !available_only || m.is_available)
            .cloned()
            .collect();
        models.sort_by_key(|m| (m.sort_order, m.id));
        Ok(models)
    }

    async fn lora(&self, code: &str) -> Result<Option<Lora>, StoreError> {
        Ok(self
            .loras
            .iter()
            .find(|l| l.code == code)
            .or_else(|| self.loras.iter().find(|l| l.name == code))
            .cloned())
    }

    async fn loras(&self, base_model: Option<&str>) -> Result<Vec<Lora>, StoreError> {
        let mut loras: Vec<Lora> = self
            .loras
            .iter()
            .filter(|l| l.is_available)
            .filter(|l| base_model.is_none_or(|b| l.base_model == b))
            .cloned()
            .collect();
        loras.sort_by_key(|l| (l.sort_order, l.id));
        Ok(loras)
    }

    async fn loras_with_previews(&self) -> Result<Vec<Lora>, StoreError> {
        Ok(self
            .loras
            .iter()
            .filter(|l| l.preview_image_path.as_deref().is_some_and(|p| !p.is_empty()))
            .cloned()
            .collect())
    }

    async fn workflow(&self, id: DbId) -> Result<Option<WorkflowTemplate>, StoreError> {
        Ok(self.workflows.iter().find(|w| w.id == id).cloned())
    }

    async fn workflow_by_name(&self, name: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        Ok(self.workflows.iter().find(|w| w.name == name).cloned())
    }
}
