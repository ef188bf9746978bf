//! PostgreSQL-backed [`Catalog`].

use async_trait::async_trait;
use sqlx::PgPool;
use yeepay_core::types::DbId;

use crate::catalog::Catalog;
use crate::models::registry::{BaseModel, Lora, WorkflowTemplate};
use crate::repositories::{BaseModelRepo, LoraRepo, WorkflowRepo};
use crate::store::StoreError;

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn base_model(&self, code: &str) -> Result<Option<BaseModel>, StoreError> {
        Ok(BaseModelRepo::find_by_code(&self.pool, code).await?)
    }

    async fn base_models(&self, available_only: bool) -> Result<Vec<BaseModel>, StoreError> {
        Ok(BaseModelRepo::list(&self.pool, available_only).await?)
    }

    async fn lora(&self, code: &str) -> Result<Option<Lora>, StoreError> {
        Ok(LoraRepo::find_by_code(&self.pool, code).await?)
    }

    async fn loras(&self, base_model: Option<&str>) -> Result<Vec<Lora>, StoreError> {
        Ok(LoraRepo::list_available(&self.pool, base_model).await?)
    }

    async fn loras_with_previews(&self) -> Result<Vec<Lora>, StoreError> {
        Ok(LoraRepo::list_with_previews(&self.pool).await?)
    }

    async fn workflow(&self, id: DbId) -> Result<Option<WorkflowTemplate>, StoreError> {
        Ok(WorkflowRepo::find_by_id(&self.pool, id).await?)
    }

    async fn workflow_by_name(&self, name: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        Ok(WorkflowRepo::find_by_name(&self.pool, name).await?)
    }
}
