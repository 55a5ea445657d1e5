use std::time::Duration;

use crate::backend::ClassifiedError;
use pilot_store::Task;

/// Tunables for [`super::Dispatcher`]. Constructed by the caller; the
/// dispatcher never reads the environment itself.
#[derive(Clone)]
pub struct DispatcherConfig {
    /// On `Start()`, `running` executions older than this are reclaimed back
    /// to `queued`. `Duration::ZERO` reclaims every running row.
    pub stale_task_duration: Duration,
    /// How long `Stop()` waits for in-flight workers to drain before giving
    /// up.
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stale_task_duration: Duration::ZERO,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Snapshot of one worker's state, returned by `GetWorkerStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub project_path: String,
    pub is_processing: bool,
    pub current_task_id: Option<String>,
}

/// Invoked when a worker's backend run is classified as rate-limited. The
/// caller (typically whoever wires up the [`crate::scheduler::Scheduler`])
/// is responsible for parking `task` and re-submitting it later; the
/// dispatcher itself has no notion of retry scheduling.
pub type RateLimitCallback = std::sync::Arc<dyn Fn(Task, ClassifiedError) + Send + Sync>;
