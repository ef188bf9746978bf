//! Repository for the `tasks` table.

use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use yeepay_core::task::TaskStatus;
use yeepay_core::types::TaskId;

use crate::models::task::{CreateTask, StatusChange, Task, TaskListQuery, TaskUpdate};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, task_type, status, prompt_id, description, parameters, \
    result_path, image_urls, reference_image_path, error_message, \
    progress, is_favorited, started_at, completed_at, created_at, updated_at";

/// Provides CRUD and lifecycle operations for tasks.
pub struct TaskRepo;

impl TaskRepo {
    // ── Queries ──────────────────────────────────────────────────────

    /// Insert a new pending task, returning the inserted row.
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        input: &CreateTask,
    ) -> Result<Task, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (id, task_type, status, description, parameters, reference_image_path) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(input.id)
            .bind(input.task_type.as_str())
            .bind(TaskStatus::Pending.as_str())
            .bind(&input.description)
            .bind(&input.parameters)
            .bind(&input.reference_image_path)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: TaskId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lock a task row for the rest of the surrounding transaction.
    pub async fn find_for_update<'e>(
        executor: impl PgExecutor<'e>,
        id: TaskId,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Page through tasks matching `params`.
    pub async fn list(pool: &PgPool, params: &TaskListQuery) -> Result<Vec<Task>, sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM tasks"));
        push_filters(&mut builder, params);
        builder
            .push(format!(" ORDER BY created_at {}, id ", params.order.as_sql()))
            .push(params.order.as_sql())
            .push(" LIMIT ")
            .push_bind(params.limit)
            .push(" OFFSET ")
            .push_bind(params.offset);
        builder.build_query_as::<Task>().fetch_all(pool).await
    }

    /// Count tasks matching the filters of `params` (paging ignored).
    pub async fn count(pool: &PgPool, params: &TaskListQuery) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        push_filters(&mut builder, params);
        builder.build_query_scalar::<i64>().fetch_one(pool).await
    }

    /// Non-terminal tasks, oldest first.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status IN ($1, $2) \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Pending.as_str())
            .bind(TaskStatus::Running.as_str())
            .fetch_all(pool)
            .await
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Apply a partial update. Absent fields keep their value.
    pub async fn update(
        pool: &PgPool,
        id: TaskId,
        input: &TaskUpdate,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks SET \
                parameters = COALESCE($2, parameters), \
                is_favorited = COALESCE($3, is_favorited), \
                progress = COALESCE($4, progress), \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(&input.parameters)
            .bind(input.is_favorited)
            .bind(input.progress)
            .fetch_optional(pool)
            .await
    }

    /// Write a status transition. The caller has already validated it
    /// against the locked row.
    pub async fn apply_status<'e>(
        executor: impl PgExecutor<'e>,
        id: TaskId,
        change: &StatusChange,
    ) -> Result<Task, sqlx::Error> {
        let query = format!(
            "UPDATE tasks SET \
                status = $2, \
                prompt_id = COALESCE($3, prompt_id), \
                result_path = COALESCE($4, result_path), \
                image_urls = COALESCE($5, image_urls), \
                error_message = COALESCE($6, error_message), \
                progress = COALESCE($7, progress), \
                started_at = CASE WHEN $8 THEN NOW() ELSE started_at END, \
                completed_at = CASE WHEN $9 THEN NOW() ELSE completed_at END, \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(change.to.as_str())
            .bind(&change.prompt_id)
            .bind(&change.result_path)
            .bind(&change.image_urls)
            .bind(&change.error_message)
            .bind(change.progress)
            .bind(change.to == TaskStatus::Running)
            .bind(change.to.is_terminal())
            .fetch_one(executor)
            .await
    }

    /// Delete a task row if it is in a terminal status. Events cascade.
    /// Returns whether a row was removed.
    pub async fn delete_terminal(pool: &PgPool, id: TaskId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE id = $1 \
             AND status IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Append the `WHERE` clause for the filters of `params`.
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &TaskListQuery) {
    let mut sep = " WHERE ";
    if let Some(task_type) = params.task_type {
        builder.push(sep).push("task_type = ").push_bind(task_type.as_str());
        sep = " AND ";
    }
    if let Some(status) = params.status {
        builder.push(sep).push("status = ").push_bind(status.as_str());
        sep = " AND ";
    }
    if params.favorites_only {
        builder.push(sep).push("is_favorited = TRUE");
    }
}
