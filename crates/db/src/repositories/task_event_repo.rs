//! Repository for the append-only `task_events` table.

use sqlx::{PgExecutor, PgPool};
use yeepay_core::task::TaskStatus;
use yeepay_core::types::TaskId;

use crate::models::task::TaskEvent;

const COLUMNS: &str = "id, task_id, from_status, to_status, message, created_at";

pub struct TaskEventRepo;

impl TaskEventRepo {
    /// Record a transition of `task_id`.
    pub async fn append<'e>(
        executor: impl PgExecutor<'e>,
        task_id: TaskId,
        from: Option<TaskStatus>,
        to: TaskStatus,
        message: Option<&str>,
    ) -> Result<TaskEvent, sqlx::Error> {
        let query = format!(
            "INSERT INTO task_events (task_id, from_status, to_status, message) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskEvent>(&query)
            .bind(task_id)
            .bind(from.map(TaskStatus::as_str))
            .bind(to.as_str())
            .bind(message)
            .fetch_one(executor)
            .await
    }

    /// All events of a task, oldest first.
    pub async fn list_for_task(
        pool: &PgPool,
        task_id: TaskId,
    ) -> Result<Vec<TaskEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_events WHERE task_id = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, TaskEvent>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }
}
