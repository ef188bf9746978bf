//! Repository for the `workflows` table.

use sqlx::PgPool;
use yeepay_core::types::DbId;

use crate::models::registry::WorkflowTemplate;

const COLUMNS: &str =
    "id, name, description, workflow_json, is_available, created_at, updated_at";

pub struct WorkflowRepo;

impl WorkflowRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<WorkflowTemplate>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1");
        sqlx::query_as::<_, WorkflowTemplate>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_name(
        pool: &PgPool,
        name: &str,
    ) -> Result<Option<WorkflowTemplate>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows WHERE name = $1");
        sqlx::query_as::<_, WorkflowTemplate>(&query)
            .bind(name)
            .fetch_optional(pool)
            .await
    }
}
