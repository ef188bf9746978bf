//! In-memory [`TaskStore`] for tests and database-less runs.
//!
//! A single `RwLock` guards all state, so every write is serialized and
//! readers always see the last committed write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use yeepay_core::task::{TaskStatus, PROGRESS_PENDING};
use yeepay_core::types::TaskId;

use crate::models::task::{
    CreateTask, SortOrder, StatusChange, Task, TaskEvent, TaskListQuery, TaskUpdate,
};
use crate::store::{check_transition, StoreError, TaskStore};

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    events: Vec<TaskEvent>,
    next_event_id: i64,
}

impl State {
    fn push_event(
        &mut self,
        task_id: TaskId,
        from: Option<TaskStatus>,
        to: TaskStatus,
        message: Option<&str>,
    ) {
        self.next_event_id += 1;
        self.events.push(TaskEvent {
            id: self.next_event_id,
            task_id,
            from_status: from.map(|s| s.as_str().to_string()),
            to_status: to.as_str().to_string(),
            message: message.map(str::to_string),
            created_at: Utc::now(),
        });
    }
}

#[derive(Default)]
pub struct MemoryTaskStore {
    state: RwLock<State>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut tasks: Vec<Task>, order: SortOrder) -> Vec<Task> {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    if order == SortOrder::Desc {
        tasks.reverse();
    }
    tasks
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, input: &CreateTask) -> Result<Task, StoreError> {
        let now = Utc::now();
        let task = Task {
            id: input.id,
            task_type: input.task_type,
            status: TaskStatus::Pending,
            prompt_id: None,
            description: input.description.clone(),
            parameters: input.parameters.clone(),
            result_path: None,
            image_urls: Vec::new(),
            reference_image_path: input.reference_image_path.clone(),
            error_message: None,
            progress: PROGRESS_PENDING,
            is_favorited: false,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        state.tasks.insert(task.id, task.clone());
        state.push_event(task.id, None, TaskStatus::Pending, Some("created"));
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn update(&self, id: TaskId, delta: &TaskUpdate) -> Result<Task, StoreError> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(parameters) = &delta.parameters {
            task.parameters = parameters.clone();
        }
        if let Some(favorited) = delta.is_favorited {
            task.is_favorited = favorited;
        }
        if let Some(progress) = delta.progress {
            task.progress = progress;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn list(&self, query: &TaskListQuery) -> Result<Vec<Task>, StoreError> {
        let state = self.state.read().await;
        let matching: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        Ok(sorted(matching, query.order)
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, query: &TaskListQuery) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state.tasks.values().filter(|t| query.matches(t)).count() as i64)
    }

    async fn set_status(&self, id: TaskId, change: &StatusChange) -> Result<Task, StoreError> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        check_transition(task, change)?;

        let from = task.status;
        let now = Utc::now();
        task.status = change.to;
        if let Some(prompt_id) = &change.prompt_id {
            task.prompt_id = Some(prompt_id.clone());
        }
        if let Some(result_path) = &change.result_path {
            task.result_path = Some(result_path.clone());
        }
        if let Some(urls) = &change.image_urls {
            task.image_urls = urls.clone();
        }
        if let Some(error) = &change.error_message {
            task.error_message = Some(error.clone());
        }
        if let Some(progress) = change.progress {
            task.progress = progress;
        }
        if change.to == TaskStatus::Running {
            task.started_at = Some(now);
        }
        if change.to.is_terminal() {
            task.completed_at = Some(now);
        }
        task.updated_at = now;
        let updated = task.clone();

        state.push_event(id, Some(from), change.to, change.message.as_deref());
        Ok(updated)
    }

    async fn list_active(&self) -> Result<Vec<Task>, StoreError> {
        let state = self.state.read().await;
        let active: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        Ok(sorted(active, SortOrder::Asc))
    }

    async fn events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.task_id == id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let task = state.tasks.get(&id).ok_or(StoreError::NotFound(id))?;
        if !task.status.is_terminal() {
            return Err(StoreError::TaskActive {
                id,
                status: task.status,
            });
        }
        state.tasks.remove(&id);
        state.events.retain(|e| e.task_id != id);
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}
