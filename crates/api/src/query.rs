//! Shared query parameter types for API handlers.

use serde::Deserialize;
use yeepay_core::task::{TaskStatus, TaskType};
use yeepay_db::models::task::{SortOrder, TaskListQuery};

/// Largest page the history endpoints return.
pub const MAX_PAGE_SIZE: i64 = 200;

/// `?limit=&offset=&order=&task_type=&status=` on history listings.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: Option<SortOrder>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
}

impl HistoryParams {
    /// Clamp paging and build the store query.
    pub fn into_query(self, favorites_only: bool) -> TaskListQuery {
        let defaults = TaskListQuery::default();
        TaskListQuery {
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
            order: self.order.unwrap_or_default(),
            task_type: self.task_type,
            status: self.status,
            favorites_only,
        }
    }
}

/// `?base_model=` on the LoRA listing.
#[derive(Debug, Deserialize)]
pub struct LoraParams {
    pub base_model: Option<String>,
}
