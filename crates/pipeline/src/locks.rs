//! Per-task mutual exclusion.
//!
//! Every lifecycle write to a task happens while holding its lock, so the
//! submission path, reconciliation workers and user actions never interleave
//! on the same task. Entries are weak and pruned once unused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use yeepay_core::types::TaskId;

/// Map size above which dead entries are pruned on insert.
const PRUNE_THRESHOLD: usize = 256;

#[derive(Default)]
pub struct TaskLocks {
    locks: Mutex<HashMap<TaskId, Weak<AsyncMutex<()>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock of `id`, waiting for any current holder.
    pub async fn lock(&self, id: TaskId) -> OwnedMutexGuard<()> {
        let mutex = self.entry(id);
        mutex.lock_owned().await
    }

    fn entry(&self, id: TaskId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = locks.get(&id).and_then(Weak::upgrade) {
            return existing;
        }
        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }
        let mutex = Arc::new(AsyncMutex::new(()));
        locks.insert(id, Arc::downgrade(&mutex));
        mutex
    }

    /// Number of tracked entries, live or not yet pruned.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
