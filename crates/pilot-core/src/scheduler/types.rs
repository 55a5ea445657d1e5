use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A task parked after a `rate_limit`-classified run, waiting to be
/// re-submitted.
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub task: pilot_store::Task,
    pub retry_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
}

/// Tunables for [`super::Scheduler`]. Constructed by the caller; the
/// scheduler never reads the environment itself.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How often the background ticker wakes to check for ready/expired
    /// tasks.
    pub check_interval: Duration,
    /// Added to a stated rate-limit reset time to tolerate clock skew on
    /// the upstream service.
    pub retry_buffer: Duration,
    /// A task whose `attempts` exceeds this is handed to `on_expired`
    /// instead of being retried again.
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            retry_buffer: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

/// Snapshot returned by `SchedulerStatus()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub running: bool,
    pub pending_count: usize,
    pub next_retry: Option<DateTime<Utc>>,
}

type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Invoked once per tick for every `PendingTask` whose `retry_at` has
/// passed. Typically re-submits through `Dispatcher::queue_task`; if that
/// submit itself rate-limits, the callback is responsible for calling
/// [`super::Scheduler::add`] again with a fresh `retry_at`.
pub type RetryCallback = Arc<dyn Fn(PendingTask) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked once per tick for every `PendingTask` that exhausted
/// `max_attempts`. Typically marks the originating execution terminally
/// failed with reason "max retries exceeded".
pub type ExpiredCallback = Arc<dyn Fn(PendingTask) -> BoxFuture<'static, ()> + Send + Sync>;
