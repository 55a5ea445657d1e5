//! Rate-limit queue & scheduler: parks tasks that failed with a
//! `rate_limit`-classified error and re-injects them after the stated reset,
//! without blocking any worker.

mod error;
mod queue;
mod types;

pub use error::SchedulerError;
pub use types::{ExpiredCallback, PendingTask, RetryCallback, SchedulerConfig, SchedulerStatus};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pilot_store::Task;
use queue::PendingQueue;

/// Background scheduler for rate-limited retries. Construct with
/// [`Scheduler::new`], call [`Scheduler::start`] once, and hand tasks to it
/// with [`Scheduler::add`] whenever a worker classifies a run as
/// `rate_limit`.
pub struct Scheduler {
    queue: Arc<PendingQueue>,
    config: SchedulerConfig,
    on_expired: ExpiredCallback,
    on_retry: RetryCallback,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, on_expired: ExpiredCallback, on_retry: RetryCallback) -> Self {
        Self {
            queue: Arc::new(PendingQueue::new()),
            config,
            on_expired,
            on_retry,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Park `task`, retrying no earlier than `retry_at` (already inclusive
    /// of `config.retry_buffer` — compute it as `stated_reset +
    /// retry_buffer` before calling).
    pub async fn add(&self, task: Task, retry_at: DateTime<Utc>, raw_error: impl Into<String>) {
        self.queue.add(task, retry_at, raw_error).await;
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.handle.lock().await.is_some(),
            pending_count: self.queue.len().await,
            next_retry: self.queue.next_retry_time().await,
        }
    }

    /// Start the background ticker. Fails with
    /// [`SchedulerError::AlreadyRunning`] if already started.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let scheduler = self.clone();
        *handle = Some(tokio::spawn(async move { scheduler.run().await }));
        Ok(())
    }

    /// Drain the ticker, wait for any in-flight callback to return, then
    /// report stopped.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        for pending in self.queue.get_expired(self.config.max_attempts).await {
            (self.on_expired)(pending).await;
        }
        for pending in self.queue.get_ready(Utc::now()).await {
            (self.on_retry)(pending).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "title".to_string(),
            description: "description".to_string(),
            project_path: "/tmp/project".to_string(),
            branch: None,
            create_pr: false,
            labels: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn ready_task_triggers_retry_callback() {
        let retried: Arc<AsyncMutex<Vec<String>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let retried_clone = retried.clone();

        let config = SchedulerConfig {
            check_interval: Duration::from_millis(20),
            retry_buffer: Duration::from_secs(0),
            max_attempts: 5,
        };
        let on_expired: ExpiredCallback = Arc::new(|_| Box::pin(async {}));
        let on_retry: RetryCallback = Arc::new(move |pending| {
            let retried = retried_clone.clone();
            Box::pin(async move {
                retried.lock().await.push(pending.task.id);
            })
        });

        let scheduler = Arc::new(Scheduler::new(config, on_expired, on_retry));
        scheduler
            .add(task("T-1"), Utc::now() - chrono::Duration::seconds(1), "rate limited")
            .await;
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert_eq!(*retried.lock().await, vec!["T-1".to_string()]);
        assert_eq!(scheduler.status().await.pending_count, 0);
    }

    #[tokio::test]
    async fn task_past_max_attempts_triggers_expired_callback_not_retry() {
        let expired_calls = Arc::new(AtomicUsize::new(0));
        let retry_calls = Arc::new(AtomicUsize::new(0));
        let expired_clone = expired_calls.clone();
        let retry_clone = retry_calls.clone();

        let config = SchedulerConfig {
            check_interval: Duration::from_millis(20),
            retry_buffer: Duration::from_secs(0),
            max_attempts: 2,
        };
        let on_expired: ExpiredCallback = Arc::new(move |_| {
            let counter = expired_clone.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        let on_retry: RetryCallback = Arc::new(move |_| {
            let counter = retry_clone.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        let scheduler = Arc::new(Scheduler::new(config, on_expired, on_retry));
        let retry_at = Utc::now() - chrono::Duration::seconds(1);
        for _ in 0..3 {
            scheduler.add(task("T-1"), retry_at, "rate limited").await;
        }
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert_eq!(expired_calls.load(Ordering::SeqCst), 1);
        assert_eq!(retry_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let config = SchedulerConfig::default();
        let on_expired: ExpiredCallback = Arc::new(|_| Box::pin(async {}));
        let on_retry: RetryCallback = Arc::new(|_| Box::pin(async {}));
        let scheduler = Arc::new(Scheduler::new(config, on_expired, on_retry));

        scheduler.start().await.unwrap();
        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn next_retry_reflects_earliest_pending_task() {
        let config = SchedulerConfig::default();
        let on_expired: ExpiredCallback = Arc::new(|_| Box::pin(async {}));
        let on_retry: RetryCallback = Arc::new(|_| Box::pin(async {}));
        let scheduler = Arc::new(Scheduler::new(config, on_expired, on_retry));

        assert!(scheduler.status().await.next_retry.is_none());

        let retry_at = Utc::now() + chrono::Duration::seconds(60);
        scheduler.add(task("T-1"), retry_at, "rate limited").await;
        assert_eq!(scheduler.status().await.next_retry, Some(retry_at));
    }
}
