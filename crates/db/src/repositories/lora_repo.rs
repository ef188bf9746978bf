//! Repository for the `loras` table.

use sqlx::PgPool;

use crate::models::registry::Lora;

const COLUMNS: &str = "\
    id, code, name, display_name, base_model, file_path, trigger_word, \
    is_available, preview_image_path, sort_order, created_at, updated_at";

pub struct LoraRepo;

impl LoraRepo {
    /// Find a LoRA by its code, falling back to its name.
    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Lora>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM loras WHERE code = $1 OR name = $1 \
             ORDER BY (code = $1) DESC LIMIT 1"
        );
        sqlx::query_as::<_, Lora>(&query)
            .bind(code)
            .fetch_optional(pool)
            .await
    }

    /// Available LoRAs, optionally restricted to one base model.
    pub async fn list_available(
        pool: &PgPool,
        base_model: Option<&str>,
    ) -> Result<Vec<Lora>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM loras \
             WHERE is_available = TRUE AND ($1::TEXT IS NULL OR base_model = $1) \
             ORDER BY sort_order ASC, id ASC"
        );
        sqlx::query_as::<_, Lora>(&query)
            .bind(base_model)
            .fetch_all(pool)
            .await
    }

    /// Every LoRA that declares a preview image.
    pub async fn list_with_previews(pool: &PgPool) -> Result<Vec<Lora>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM loras \
             WHERE preview_image_path IS NOT NULL AND preview_image_path <> '' \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, Lora>(&query).fetch_all(pool).await
    }
}
