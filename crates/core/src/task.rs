//! Task lifecycle: types, the status DAG and progress milestones.

define_text_enum! {
    /// What a task asks the engine to do.
    TaskType {
        Generate => "generate",
        Upscale => "upscale",
    }
}

define_text_enum! {
    /// Lifecycle status of a task.
    ///
    /// Transitions are monotone along
    /// `pending -> running -> {completed, failed, cancelled}`, with
    /// `pending -> failed` and `pending -> cancelled` as shortcuts.
    TaskStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Progress reported while the task waits in our own store.
pub const PROGRESS_PENDING: i16 = 0;
/// Progress once the engine accepted the prompt.
pub const PROGRESS_SUBMITTED: i16 = 10;
/// Progress once the engine reports the prompt as executing.
pub const PROGRESS_EXECUTING: i16 = 50;
/// Progress of a completed task.
pub const PROGRESS_DONE: i16 = 100;

impl TaskStatus {
    /// Terminal statuses are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle DAG.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// Advisory position of a running task in the engine queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePosition {
    Running,
    Pending,
}
