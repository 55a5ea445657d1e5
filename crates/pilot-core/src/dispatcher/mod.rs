//! Dispatcher: one worker per project path, draining queued executions to
//! completion in submission order and serializing all runs against a given
//! working directory.

mod error;
mod types;
mod worker;

pub use error::DispatcherError;
pub use types::{DispatcherConfig, RateLimitCallback, WorkerStatus};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pilot_store::queries;
use pilot_store::{Execution, ExecutionStatus, StoreError, Task};

use crate::backend::Backend;
use crate::hooks::{HookConfig, HookGateManager};
use worker::{run_worker, Worker, WorkerContext};

/// Coordinates one [`Worker`] per project path against a shared execution
/// store and a single [`Backend`]. Construct with [`Dispatcher::new`], call
/// [`Dispatcher::start`] once to reclaim any executions orphaned by a crash,
/// then submit work with [`Dispatcher::queue_task`].
pub struct Dispatcher {
    pool: SqlitePool,
    backend: Arc<dyn Backend>,
    hooks: Option<Arc<HookGateManager>>,
    hook_config: HookConfig,
    rate_limit_callback: Option<RateLimitCallback>,
    config: DispatcherConfig,
    cancel: CancellationToken,
    workers: Mutex<HashMap<String, (Arc<Worker>, JoinHandle<()>)>>,
}

impl Dispatcher {
    pub fn new(pool: SqlitePool, backend: Arc<dyn Backend>, config: DispatcherConfig) -> Self {
        Self {
            pool,
            backend,
            hooks: None,
            hook_config: HookConfig::default(),
            rate_limit_callback: None,
            config,
            cancel: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Install a hook-gate manager, so every run has quality gates installed
    /// and removed around it. Without this, workers run the backend bare.
    pub fn with_hooks(mut self, hooks: Arc<HookGateManager>, hook_config: HookConfig) -> Self {
        self.hooks = Some(hooks);
        self.hook_config = hook_config;
        self
    }

    /// Route rate-limited runs to `callback` instead of letting them fall on
    /// the floor as deferred-but-unscheduled executions.
    pub fn with_rate_limit_callback(mut self, callback: RateLimitCallback) -> Self {
        self.rate_limit_callback = Some(callback);
        self
    }

    /// Reclaim executions left `running` by a previous process that never
    /// got to mark them terminal, putting them back on the front of their
    /// project's queue. Call once before accepting new work.
    pub async fn start(&self) -> Result<(), DispatcherError> {
        let stale =
            queries::get_stale_running_executions(&self.pool, Utc::now(), self.config.stale_task_duration)
                .await?;

        for execution in &stale {
            queries::update_execution_status(&self.pool, &execution.exec_id, ExecutionStatus::Queued, None)
                .await?;
        }

        let mut projects: Vec<&str> = stale.iter().map(|e| e.project_path.as_str()).collect();
        projects.sort_unstable();
        projects.dedup();
        for project_path in projects {
            self.ensure_worker(project_path).await.signal();
        }

        Ok(())
    }

    /// Submit a task. Fails with [`DispatcherError::Duplicate`] if an active
    /// execution already exists for `task.id`.
    pub async fn queue_task(&self, task: &Task) -> Result<String, DispatcherError> {
        let exec_id = format!("{}-{:x}", task.id, rand::random::<u64>());
        let execution = Execution::new_queued(exec_id.clone(), task);

        match queries::save_execution(&self.pool, &execution).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(task_id)) => return Err(DispatcherError::Duplicate(task_id)),
            Err(e) => return Err(e.into()),
        }

        self.ensure_worker(&task.project_path).await.signal();
        Ok(exec_id)
    }

    /// Snapshot of every worker that has ever handled a task this process,
    /// keyed by project path.
    pub async fn get_worker_status(&self) -> HashMap<String, WorkerStatus> {
        let workers = self.workers.lock().await;
        let mut statuses = HashMap::with_capacity(workers.len());
        for (project_path, (worker, _handle)) in workers.iter() {
            statuses.insert(project_path.clone(), worker.status().await);
        }
        statuses
    }

    pub async fn get_execution_status(&self, exec_id: &str) -> Result<Execution, DispatcherError> {
        queries::get_execution(&self.pool, exec_id).await.map_err(Into::into)
    }

    /// Signal every worker to stop after its current run and wait up to
    /// `config.drain_timeout` for them to exit. Workers still draining past
    /// the deadline are left running; their executions stay `running` and
    /// will be reclaimed by the next `start()`.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut workers = self.workers.lock().await;
            workers
                .drain()
                .map(|(project_path, (_worker, handle))| (project_path, handle))
                .collect()
        };

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        for (project_path, handle) in handles {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!(project_path = %project_path, "worker did not drain before timeout");
            }
        }
    }

    async fn ensure_worker(&self, project_path: &str) -> Arc<Worker> {
        let mut workers = self.workers.lock().await;
        if let Some((worker, _handle)) = workers.get(project_path) {
            return worker.clone();
        }

        let worker = Worker::new(project_path.to_string());
        let ctx = WorkerContext {
            pool: self.pool.clone(),
            backend: self.backend.clone(),
            hooks: self.hooks.clone(),
            hook_config: self.hook_config,
            rate_limit_callback: self.rate_limit_callback.clone(),
        };
        let handle = tokio::spawn(run_worker(worker.clone(), ctx, self.cancel.clone()));
        workers.insert(project_path.to_string(), (worker.clone(), handle));
        worker
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken as Cancel;

    use super::*;
    use crate::backend::{BackendError, ExecuteOptions, ExecutionResult};

    struct FakeBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn execute(
            &self,
            _opts: ExecuteOptions,
            _cancel: Cancel,
        ) -> Result<ExecutionResult, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionResult {
                success: true,
                ..Default::default()
            })
        }
    }

    async fn temp_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let config = pilot_store::StoreConfig::new(dir.path().join("pilot.db"));
        let pool = pilot_store::pool::create_pool(&config).await.unwrap();
        pilot_store::pool::run_migrations(&pool, pilot_store::pool::default_migrations_path())
            .await
            .unwrap();
        (dir, pool)
    }

    fn task(id: &str, project_path: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "do a thing".to_string(),
            description: "description".to_string(),
            project_path: project_path.to_string(),
            branch: None,
            create_pr: false,
            labels: BTreeSet::new(),
        }
    }

    async fn wait_terminal(dispatcher: &Dispatcher, exec_id: &str) -> Execution {
        for _ in 0..200 {
            let execution = dispatcher.get_execution_status(exec_id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("execution {exec_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn queue_and_run_to_completion() {
        let (_dir, pool) = temp_pool().await;
        let backend = Arc::new(FakeBackend {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(pool, backend, DispatcherConfig::default());
        dispatcher.start().await.unwrap();

        let exec_id = dispatcher.queue_task(&task("T-1", "/tmp/proj-a")).await.unwrap();
        let execution = wait_terminal(&dispatcher, &exec_id).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn duplicate_submit_for_active_execution_is_rejected() {
        let (_dir, pool) = temp_pool().await;
        let backend = Arc::new(FakeBackend {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(pool, backend, DispatcherConfig::default());

        let t = task("T-2", "/tmp/proj-b");
        dispatcher.queue_task(&t).await.unwrap();
        let err = dispatcher.queue_task(&t).await.unwrap_err();
        assert!(matches!(err, DispatcherError::Duplicate(id) if id == "T-2"));

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn start_reclaims_stale_running_executions() {
        let (_dir, pool) = temp_pool().await;
        let t = task("T-3", "/tmp/proj-c");
        let execution = Execution::new_queued("e-stale".to_string(), &t);
        queries::save_execution(&pool, &execution).await.unwrap();
        queries::update_execution_status(&pool, "e-stale", ExecutionStatus::Running, None)
            .await
            .unwrap();

        let backend = Arc::new(FakeBackend {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(pool, backend, DispatcherConfig::default());
        dispatcher.start().await.unwrap();

        let execution = wait_terminal(&dispatcher, "e-stale").await;
        assert_eq!(execution.status, ExecutionStatus::Completed);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn three_projects_run_independently_in_parallel() {
        let (_dir, pool) = temp_pool().await;
        let backend = Arc::new(FakeBackend {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(pool, backend, DispatcherConfig::default());
        dispatcher.start().await.unwrap();

        let mut exec_ids = Vec::new();
        for (i, project) in ["/tmp/proj-x", "/tmp/proj-y", "/tmp/proj-z"].iter().enumerate() {
            let exec_id = dispatcher
                .queue_task(&task(&format!("T-{i}"), project))
                .await
                .unwrap();
            exec_ids.push(exec_id);
        }

        for exec_id in &exec_ids {
            let execution = wait_terminal(&dispatcher, exec_id).await;
            assert_eq!(execution.status, ExecutionStatus::Completed);
        }

        let statuses = dispatcher.get_worker_status().await;
        assert_eq!(statuses.len(), 3);
        for status in statuses.values() {
            assert!(!status.is_processing);
        }

        dispatcher.stop().await;
    }
}
