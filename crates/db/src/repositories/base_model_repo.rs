//! Repository for the `base_models` table.

use sqlx::PgPool;

use crate::models::registry::BaseModel;

const COLUMNS: &str = "\
    id, code, name, display_name, model_type, unet_file, clip_file, vae_file, \
    workflow_id, is_available, is_default, sort_order, description, \
    created_at, updated_at";

pub struct BaseModelRepo;

impl BaseModelRepo {
    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<BaseModel>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM base_models WHERE code = $1");
        sqlx::query_as::<_, BaseModel>(&query)
            .bind(code)
            .fetch_optional(pool)
            .await
    }

    /// List base models ordered by `sort_order`, optionally only available ones.
    pub async fn list(pool: &PgPool, available_only: bool) -> Result<Vec<BaseModel>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM base_models \
             WHERE ($1 = FALSE OR is_available = TRUE) \
             ORDER BY sort_order ASC, id ASC"
        );
        sqlx::query_as::<_, BaseModel>(&query)
            .bind(available_only)
            .fetch_all(pool)
            .await
    }
}
