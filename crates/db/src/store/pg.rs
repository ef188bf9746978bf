//! PostgreSQL-backed [`TaskStore`].
//!
//! Transitions run in a transaction that locks the task row with
//! `SELECT ... FOR UPDATE`, so concurrent writers to one task serialize in
//! the database and the audit event commits together with the change.

use async_trait::async_trait;
use sqlx::PgPool;
use yeepay_core::types::TaskId;

use crate::models::task::{CreateTask, StatusChange, Task, TaskEvent, TaskListQuery, TaskUpdate};
use crate::repositories::{TaskEventRepo, TaskRepo};
use crate::store::{check_transition, StoreError, TaskStore};

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, input: &CreateTask) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let task = TaskRepo::create(&mut *tx, input).await?;
        TaskEventRepo::append(&mut *tx, task.id, None, task.status, Some("created")).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(TaskRepo::find_by_id(&self.pool, id).await?)
    }

    async fn update(&self, id: TaskId, delta: &TaskUpdate) -> Result<Task, StoreError> {
        TaskRepo::update(&self.pool, id, delta)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError> {
        Ok(TaskRepo::list(&self.pool, query).await?)
    }

    async fn count(&self, query: &TaskListQuery) -> Result<i64, StoreError> {
        Ok(TaskRepo::count(&self.pool, query).await?)
    }

    async fn set_status(&self, id: TaskId, change: &StatusChange) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = TaskRepo::find_for_update(&mut *tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        check_transition(&current, change)?;

        let updated = TaskRepo::apply_status(&mut *tx, id, change).await?;
        TaskEventRepo::append(
            &mut *tx,
            id,
            Some(current.status),
            change.to,
            change.message.as_deref(),
        )
        .await?;
        tx.commit().await?;

        Ok(updated)
    }

    async fn list_active(&self) -> Result<Vec<Task>, StoreError> {
        Ok(TaskRepo::list_active(&self.pool).await?)
    }

    async fn events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        Ok(TaskEventRepo::list_for_task(&self.pool, id).await?)
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        if TaskRepo::delete_terminal(&self.pool, id).await? {
            return Ok(());
        }
        // Nothing removed: either the row is gone or it is still active.
        match TaskRepo::find_by_id(&self.pool, id).await? {
            None => Err(StoreError::NotFound(id)),
            Some(task) => Err(StoreError::TaskActive {
                id,
                status: task.status,
            }),
        }
    }

    async fn ping(&self) -> bool {
        crate::health_check(&self.pool).await.is_ok()
    }
}
