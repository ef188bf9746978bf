//! The task store seam.
//!
//! [`TaskStore`] is the only way the pipeline mutates tasks. Both
//! implementations enforce the same rules through [`check_transition`]:
//! monotone status transitions, a set-once `prompt_id`, and a `result_path`
//! that only ever arrives together with `completed`.

use async_trait::async_trait;
use yeepay_core::task::TaskStatus;
use yeepay_core::types::TaskId;

use crate::models::task::{CreateTask, StatusChange, Task, TaskEvent, TaskListQuery, TaskUpdate};

pub mod memory;
pub mod pg;

pub use memory::MemoryTaskStore;
pub use pg::PgTaskStore;

/// Errors from the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {0} already has a prompt_id")]
    PromptIdAlreadySet(TaskId),

    #[error("result_path may only be written when completing (target status {0})")]
    ResultPathNotAllowed(TaskStatus),

    #[error("A completed task requires a non-empty result_path")]
    MissingResultPath,

    #[error("Task {id} is still {status}")]
    TaskActive { id: TaskId, status: TaskStatus },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable mapping from task id to task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, input: &CreateTask) -> Result<Task, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Partial, atomic update of non-lifecycle fields.
    async fn update(&self, id: TaskId, delta: &TaskUpdate) -> Result<Task, StoreError>;

    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError>;

    /// Number of tasks matching the filters of `query`.
    async fn count(&self, query: &TaskListQuery) -> Result<i64, StoreError>;

    /// Validate and apply a status transition, appending an audit event.
    async fn set_status(&self, id: TaskId, change: &StatusChange) -> Result<Task, StoreError>;

    /// Pending and running tasks, oldest first.
    async fn list_active(&self) -> Result<Vec<Task>, StoreError>;

    /// Audit events of a task, oldest first.
    async fn events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError>;

    /// Remove a terminal task and its events.
    async fn delete(&self, id: TaskId) -> Result<(), StoreError>;

    /// Whether the backing storage is reachable.
    async fn ping(&self) -> bool;
}

/// Check `change` against the current state of the task.
pub fn check_transition(current: &Task, change: &StatusChange) -> Result<(), StoreError> {
    if !current.status.can_transition_to(change.to) {
        return Err(StoreError::InvalidTransition {
            from: current.status,
            to: change.to,
        });
    }
    if change.prompt_id.is_some() && current.prompt_id.is_some() {
        return Err(StoreError::PromptIdAlreadySet(current.id));
    }
    if change.result_path.is_some() && change.to != TaskStatus::Completed {
        return Err(StoreError::ResultPathNotAllowed(change.to));
    }
    if change.to == TaskStatus::Completed
        && change.result_path.as_deref().is_none_or(str::is_empty)
    {
        return Err(StoreError::MissingResultPath);
    }
    Ok(())
}
