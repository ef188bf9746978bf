//! Wire views of tasks returned by the HTTP surface.

use serde::Serialize;
use uuid::Uuid;
use yeepay_core::model::UpscaleAlgorithm;
use yeepay_core::request::TaskParameters;
use yeepay_core::task::{QueuePosition, TaskStatus, TaskType};
use yeepay_core::types::{TaskId, Timestamp};
use yeepay_core::urls::image_url_prefix;
use yeepay_db::models::task::Task;

/// Full task record as served by `GET /api/task/{task_id}` and history.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub description: String,
    pub prompt_id: Option<String>,
    pub result_path: Option<String>,
    pub image_urls: Vec<String>,
    pub image_count: usize,
    pub reference_image_path: Option<String>,
    pub parameters: serde_json::Value,
    pub error_message: Option<String>,
    pub progress: i16,
    pub queue_position: Option<QueuePosition>,
    pub is_favorited: bool,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TaskView {
    pub fn new(task: Task, queue_position: Option<QueuePosition>) -> Self {
        let image_urls = derived_image_urls(&task);
        Self {
            id: task.id,
            task_type: task.task_type,
            status: task.status,
            description: task.description,
            prompt_id: task.prompt_id,
            result_path: task.result_path,
            image_count: image_urls.len(),
            image_urls,
            reference_image_path: task.reference_image_path,
            parameters: task.parameters,
            error_message: task.error_message,
            progress: task.progress,
            queue_position,
            is_favorited: task.is_favorited,
            started_at: task.started_at,
            completed_at: task.completed_at,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Stored URLs, or the primary URL rebuilt from `result_path` for rows
/// written before URLs were persisted.
pub fn derived_image_urls(task: &Task) -> Vec<String> {
    if !task.image_urls.is_empty() {
        return task.image_urls.clone();
    }
    match task.result_path.as_deref() {
        Some(path) if !path.is_empty() => {
            vec![format!("{}{path}", image_url_prefix(task.task_type))]
        }
        _ => Vec::new(),
    }
}

/// `GET /api/history` and `GET /api/favorites`.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub tasks: Vec<TaskView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// `POST /api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateAccepted {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

/// `POST /api/upscale`.
#[derive(Debug, Serialize)]
pub struct UpscaleAccepted {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
    pub scale_factor: u8,
    pub algorithm: UpscaleAlgorithm,
}

/// One accepted image of a batch upscale.
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub image_path: String,
    pub task_id: TaskId,
}

/// One refused image of a batch upscale.
#[derive(Debug, Serialize)]
pub struct BatchFailure {
    pub image_path: String,
    pub detail: String,
}

/// `POST /api/upscale/batch`.
#[derive(Debug, Serialize)]
pub struct BatchUpscaleResponse {
    pub submitted: Vec<BatchItem>,
    pub failed: Vec<BatchFailure>,
    pub total: usize,
}

/// `GET /api/upscale/{task_id}`.
#[derive(Debug, Serialize)]
pub struct UpscaleView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub progress: i16,
    pub image_path: String,
    pub scale_factor: u8,
    pub algorithm: UpscaleAlgorithm,
    pub result_path: Option<String>,
    pub image_urls: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl UpscaleView {
    /// `None` unless the task is an upscale with readable parameters.
    pub fn from_task(task: Task) -> Option<Self> {
        if task.task_type != TaskType::Upscale {
            return None;
        }
        let TaskParameters::Upscale(params) =
            serde_json::from_value::<TaskParameters>(task.parameters.clone()).ok()?
        else {
            return None;
        };
        Some(Self {
            image_urls: derived_image_urls(&task),
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            image_path: params.image_path,
            scale_factor: params.scale_factor,
            algorithm: params.algorithm,
            result_path: task.result_path,
            error_message: task.error_message,
            created_at: task.created_at,
            completed_at: task.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(task_type: TaskType) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Completed,
            prompt_id: Some("p1".into()),
            description: "d".into(),
            parameters: serde_json::json!({}),
            result_path: None,
            image_urls: Vec::new(),
            reference_image_path: None,
            error_message: None,
            progress: 100,
            is_favorited: false,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn urls_fall_back_to_result_path() {
        let mut t = task(TaskType::Upscale);
        t.result_path = Some(format!("{}/out.png", t.id));
        let view = TaskView::new(t.clone(), None);
        assert_eq!(view.image_urls, [format!("/api/upscale/image/{}/out.png", t.id)]);
        assert_eq!(view.image_count, 1);
    }

    #[test]
    fn stored_urls_win() {
        let mut t = task(TaskType::Generate);
        t.result_path = Some("x/a.png".into());
        t.image_urls = vec!["/api/image/x/a.png".into(), "/api/image/x/b.png".into()];
        assert_eq!(TaskView::new(t, None).image_count, 2);
    }

    #[test]
    fn upscale_view_rejects_generate_tasks() {
        assert!(UpscaleView::from_task(task(TaskType::Generate)).is_none());
    }
}
