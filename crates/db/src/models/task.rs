//! Task and task-event models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use yeepay_core::task::{TaskStatus, TaskType, PROGRESS_DONE, PROGRESS_SUBMITTED};
use yeepay_core::types::{TaskId, Timestamp};

/// A row from the `tasks` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Task {
    pub id: TaskId,
    #[sqlx(try_from = "String")]
    pub task_type: TaskType,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub prompt_id: Option<String>,
    pub description: String,
    pub parameters: serde_json::Value,
    pub result_path: Option<String>,
    pub image_urls: Vec<String>,
    pub reference_image_path: Option<String>,
    pub error_message: Option<String>,
    pub progress: i16,
    pub is_favorited: bool,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for inserting a new pending task.
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub id: TaskId,
    pub task_type: TaskType,
    pub description: String,
    pub parameters: serde_json::Value,
    pub reference_image_path: Option<String>,
}

impl CreateTask {
    pub fn new(task_type: TaskType, description: String, parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            description,
            parameters,
            reference_image_path: None,
        }
    }
}

/// Partial update of the mutable, non-lifecycle fields of a task.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub parameters: Option<serde_json::Value>,
    pub is_favorited: Option<bool>,
    pub progress: Option<i16>,
}

/// A status transition plus the fields written with it.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub to: TaskStatus,
    pub prompt_id: Option<String>,
    pub result_path: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub progress: Option<i16>,
    /// Free text recorded on the audit event.
    pub message: Option<String>,
}

impl StatusChange {
    fn to(status: TaskStatus) -> Self {
        Self {
            to: status,
            prompt_id: None,
            result_path: None,
            image_urls: None,
            error_message: None,
            progress: None,
            message: None,
        }
    }

    /// The engine accepted the prompt.
    pub fn running(prompt_id: impl Into<String>) -> Self {
        let prompt_id = prompt_id.into();
        Self {
            message: Some(format!("submitted as prompt {prompt_id}")),
            prompt_id: Some(prompt_id),
            progress: Some(PROGRESS_SUBMITTED),
            ..Self::to(TaskStatus::Running)
        }
    }

    /// Outputs were relocated.
    pub fn completed(result_path: String, image_urls: Vec<String>) -> Self {
        Self {
            message: Some(format!("{} output(s) relocated", image_urls.len())),
            result_path: Some(result_path),
            image_urls: Some(image_urls),
            progress: Some(PROGRESS_DONE),
            ..Self::to(TaskStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            message: Some(error.clone()),
            error_message: Some(error),
            ..Self::to(TaskStatus::Failed)
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: Some("cancelled by request".to_string()),
            ..Self::to(TaskStatus::Cancelled)
        }
    }
}

/// Sort direction for history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter and paging for task listings.
#[derive(Debug, Clone)]
pub struct TaskListQuery {
    pub limit: i64,
    pub offset: i64,
    pub order: SortOrder,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub favorites_only: bool,
}

impl Default for TaskListQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            order: SortOrder::Desc,
            task_type: None,
            status: None,
            favorites_only: false,
        }
    }
}

impl TaskListQuery {
    /// Whether `task` passes the filters (paging aside).
    pub fn matches(&self, task: &Task) -> bool {
        self.task_type.is_none_or(|t| t == task.task_type)
            && self.status.is_none_or(|s| s == task.status)
            && (!self.favorites_only || task.is_favorited)
    }
}

/// A row from the `task_events` audit table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: TaskId,
    pub from_status: Option<String>,
    pub to_status: String,
    pub message: Option<String>,
    pub created_at: Timestamp,
}
