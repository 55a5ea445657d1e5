use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use pilot_store::queries;
use pilot_store::{Execution, ExecutionStatus, Task};

use crate::backend::{Backend, BackendError, ErrorClass, ExecuteOptions};
use crate::hooks::{HookConfig, HookGateManager};

use super::types::{RateLimitCallback, WorkerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerPhase {
    Idle,
    Processing,
    Stopped,
}

struct WorkerInner {
    phase: WorkerPhase,
    current_task_id: Option<String>,
}

/// Per-project worker. Exactly one of these exists per `project_path` that
/// has ever had a task queued, serializing executions so the external agent
/// never mutates the same working directory from two runs at once.
pub(super) struct Worker {
    project_path: String,
    inner: Mutex<WorkerInner>,
    notify: Notify,
}

impl Worker {
    pub(super) fn new(project_path: String) -> Arc<Self> {
        Arc::new(Self {
            project_path,
            inner: Mutex::new(WorkerInner {
                phase: WorkerPhase::Idle,
                current_task_id: None,
            }),
            notify: Notify::new(),
        })
    }

    /// Wake the worker up to check for newly queued work.
    pub(super) fn signal(&self) {
        self.notify.notify_one();
    }

    pub(super) async fn status(&self) -> WorkerStatus {
        let inner = self.inner.lock().await;
        WorkerStatus {
            project_path: self.project_path.clone(),
            is_processing: inner.phase == WorkerPhase::Processing,
            current_task_id: inner.current_task_id.clone(),
        }
    }
}

/// Collaborators every worker loop needs; cheap to clone, shared across all
/// workers of one [`super::Dispatcher`].
#[derive(Clone)]
pub(super) struct WorkerContext {
    pub pool: SqlitePool,
    pub backend: Arc<dyn Backend>,
    pub hooks: Option<Arc<HookGateManager>>,
    pub hook_config: HookConfig,
    pub rate_limit_callback: Option<RateLimitCallback>,
}

/// Drain loop for one worker: pick the oldest queued execution for this
/// project, run it to completion, repeat until the queue is empty, then
/// sleep until signalled or cancelled.
pub(super) async fn run_worker(worker: Arc<Worker>, ctx: WorkerContext, cancel: CancellationToken) {
    loop {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let next = match queries::get_queued_tasks_for_project(&ctx.pool, &worker.project_path, 1).await
            {
                Ok(rows) => rows,
                Err(e) => {
                    error!(
                        project_path = %worker.project_path,
                        error = %e,
                        "failed to poll queued executions"
                    );
                    break;
                }
            };
            let Some(execution) = next.into_iter().next() else {
                break;
            };

            {
                let mut inner = worker.inner.lock().await;
                inner.phase = WorkerPhase::Processing;
                inner.current_task_id = Some(execution.task_id.clone());
            }

            run_one(&ctx, execution, cancel.clone()).await;

            {
                let mut inner = worker.inner.lock().await;
                inner.phase = WorkerPhase::Idle;
                inner.current_task_id = None;
            }
        }

        if cancel.is_cancelled() {
            worker.inner.lock().await.phase = WorkerPhase::Stopped;
            return;
        }

        tokio::select! {
            _ = worker.notify.notified() => {}
            _ = cancel.cancelled() => {
                worker.inner.lock().await.phase = WorkerPhase::Stopped;
                return;
            }
        }
    }
}

async fn run_one(ctx: &WorkerContext, execution: Execution, cancel: CancellationToken) {
    let exec_id = execution.exec_id.clone();

    if let Err(e) =
        queries::update_execution_status(&ctx.pool, &exec_id, ExecutionStatus::Running, None).await
    {
        error!(exec_id = %exec_id, error = %e, "failed to transition execution to running");
        return;
    }

    let task = Task {
        id: execution.task_id.clone(),
        title: execution.task_title.clone(),
        description: execution.task_description.clone(),
        project_path: execution.project_path.clone(),
        branch: execution.task_branch.clone(),
        create_pr: execution.task_create_pr,
        labels: Default::default(),
    };

    let settings_path = Path::new(&execution.project_path)
        .join(".claude")
        .join("settings.json");

    let guard = if ctx.hook_config.enabled {
        match &ctx.hooks {
            Some(hooks) => match hooks.install_hooks(&settings_path, &ctx.hook_config) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(exec_id = %exec_id, error = %e, "hook install failed, aborting execution");
                    let _ = queries::update_execution_status(
                        &ctx.pool,
                        &exec_id,
                        ExecutionStatus::Failed,
                        Some(&format!("hook install failed: {e}")),
                    )
                    .await;
                    return;
                }
            },
            None => None,
        }
    } else {
        None
    };

    let prompt = format!("{}\n\n{}", task.title, task.description);
    let opts = ExecuteOptions::new(prompt, task.project_path.clone());
    // Caught so a panicking backend never takes the worker loop down with
    // it; the execution is marked failed and the worker returns to idle.
    let outcome = AssertUnwindSafe(ctx.backend.execute(opts, cancel))
        .catch_unwind()
        .await;

    if let Some(guard) = guard {
        if let Err(e) = guard.restore() {
            warn!(exec_id = %exec_id, error = %e, "failed to restore hook gates");
        }
    }

    let (status, error) = match outcome {
        Err(panic) => {
            let message = panic_message(panic);
            error!(exec_id = %exec_id, message = %message, "worker panicked while running backend");
            (ExecutionStatus::Failed, Some(format!("panic: {message}")))
        }
        Ok(Ok(result)) if result.success => (ExecutionStatus::Completed, None),
        Ok(Ok(result)) => (ExecutionStatus::Failed, result.error),
        Ok(Err(BackendError::Cancelled)) => {
            (ExecutionStatus::Cancelled, Some("cancelled".to_string()))
        }
        Ok(Err(BackendError::SubprocessSpawn(e))) => (
            ExecutionStatus::Failed,
            Some(format!("failed to spawn backend process: {e}")),
        ),
        Ok(Err(BackendError::Classified(classified))) if classified.class == ErrorClass::RateLimit => {
            // Rate-limited runs are not failures: take the execution out of
            // {queued, running} so a later re-submit for the same task
            // succeeds, and hand the task to whoever drives the scheduler.
            let message = classified.message.clone();
            if let Some(cb) = &ctx.rate_limit_callback {
                cb(task, classified);
            }
            (ExecutionStatus::Cancelled, Some(format!("deferred: {message}")))
        }
        Ok(Err(BackendError::Classified(classified))) => {
            (ExecutionStatus::Failed, Some(classified.message))
        }
    };

    if let Err(e) = queries::update_execution_status(&ctx.pool, &exec_id, status, error.as_deref()).await {
        error!(exec_id = %exec_id, error = %e, "failed to record execution outcome");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
