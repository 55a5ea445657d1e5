//! In-memory pending-retry queue. Its own synchronization domain: the
//! scheduler's background ticker and any caller thread may call these
//! methods concurrently.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use pilot_store::Task;

use super::types::PendingTask;

#[derive(Default)]
pub struct PendingQueue {
    items: Mutex<Vec<PendingTask>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task, bumping `attempts` on every call (including the
    /// first, which starts at 1).
    pub async fn add(&self, task: Task, retry_at: DateTime<Utc>, raw_error: impl Into<String>) {
        let mut items = self.items.lock().await;
        let existing = items.iter_mut().find(|p| p.task.id == task.id);
        match existing {
            Some(pending) => {
                pending.attempts += 1;
                pending.retry_at = retry_at;
                pending.last_error = raw_error.into();
            }
            None => items.push(PendingTask {
                task,
                retry_at,
                attempts: 1,
                last_error: raw_error.into(),
                queued_at: Utc::now(),
            }),
        }
    }

    /// Remove and return every pending task whose `retry_at` has passed,
    /// ordered by `retry_at` ascending.
    pub async fn get_ready(&self, now: DateTime<Utc>) -> Vec<PendingTask> {
        let mut items = self.items.lock().await;
        let mut ready = Vec::new();
        let mut remaining = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            if item.retry_at <= now {
                ready.push(item);
            } else {
                remaining.push(item);
            }
        }
        *items = remaining;
        ready.sort_by_key(|p| p.retry_at);
        ready
    }

    /// Remove and return every pending task past `max_attempts`.
    pub async fn get_expired(&self, max_attempts: u32) -> Vec<PendingTask> {
        let mut items = self.items.lock().await;
        let mut expired = Vec::new();
        let mut remaining = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            if item.attempts > max_attempts {
                expired.push(item);
            } else {
                remaining.push(item);
            }
        }
        *items = remaining;
        expired
    }

    /// Earliest `retry_at` among pending tasks, or `None` if empty.
    pub async fn next_retry_time(&self) -> Option<DateTime<Utc>> {
        self.items.lock().await.iter().map(|p| p.retry_at).min()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }
}
