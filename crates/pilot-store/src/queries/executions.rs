//! Query functions implementing the six execution-store contract operations:
//! save, get, update status, list queued-for-project, duplicate check, and
//! stale-running recovery scan.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{Result, StoreError};
use crate::models::{Execution, ExecutionStatus};

const BUSY_RETRY_ATTEMPTS: u32 = 3;
const BUSY_RETRY_BASE: Duration = Duration::from_millis(20);

fn is_busy(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| {
            let msg = e.message();
            msg.contains("database is locked") || msg.contains("database is busy")
        })
        .unwrap_or(false)
}

/// Retry a fallible database operation a few times on `SQLITE_BUSY`/`LOCKED`,
/// with a short exponential backoff, before giving up with
/// [`StoreError::WriteContention`].
async fn retry_busy<T, Fut>(mut attempt: impl FnMut() -> Fut) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delay = BUSY_RETRY_BASE;
    for try_num in 0..BUSY_RETRY_ATTEMPTS {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) if is_busy(&e) && try_num + 1 < BUSY_RETRY_ATTEMPTS => {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) if is_busy(&e) => return Err(StoreError::WriteContention),
            Err(e) => return Err(StoreError::Db(e)),
        }
    }
    unreachable!("loop always returns")
}

/// Insert a new execution row.
///
/// Fails with [`StoreError::Duplicate`] if an active (queued or running)
/// execution already exists for `execution.task_id` — the duplicate-submit
/// guard is evaluated and enforced inside the same transaction as the
/// insert, so two concurrent submits for the same task cannot both succeed.
pub async fn save_execution(pool: &SqlitePool, execution: &Execution) -> Result<()> {
    let mut tx = pool.begin().await.map_err(StoreError::Db)?;

    let already_active: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM executions WHERE task_id = ? AND status IN ('queued', 'running'))",
    )
    .bind(&execution.task_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(StoreError::Db)?;

    if already_active {
        return Err(StoreError::Duplicate(execution.task_id.clone()));
    }

    sqlx::query(
        "INSERT INTO executions \
         (exec_id, task_id, project_path, status, created_at, started_at, completed_at, error, \
          task_title, task_description, task_branch, task_create_pr) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&execution.exec_id)
    .bind(&execution.task_id)
    .bind(&execution.project_path)
    .bind(execution.status)
    .bind(execution.created_at)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .bind(&execution.error)
    .bind(&execution.task_title)
    .bind(&execution.task_description)
    .bind(&execution.task_branch)
    .bind(execution.task_create_pr)
    .execute(&mut *tx)
    .await
    .map_err(StoreError::Db)?;

    tx.commit().await.map_err(StoreError::Db)?;
    Ok(())
}

/// Fetch a single execution by id.
pub async fn get_execution(pool: &SqlitePool, exec_id: &str) -> Result<Execution> {
    sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE exec_id = ?")
        .bind(exec_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::Db)?
        .ok_or_else(|| StoreError::NotFound(exec_id.to_owned()))
}

/// Atomically update an execution's status, and — when the new status is
/// terminal — its `completed_at` timestamp and optional error, in a single
/// write.
pub async fn update_execution_status(
    pool: &SqlitePool,
    exec_id: &str,
    status: ExecutionStatus,
    error: Option<&str>,
) -> Result<()> {
    let result = retry_busy(|| async {
        if status.is_terminal() {
            sqlx::query(
                "UPDATE executions SET status = ?, error = ?, completed_at = ? WHERE exec_id = ?",
            )
            .bind(status)
            .bind(error)
            .bind(Utc::now())
            .bind(exec_id)
            .execute(pool)
            .await
        } else if status == ExecutionStatus::Running {
            sqlx::query("UPDATE executions SET status = ?, started_at = ? WHERE exec_id = ?")
                .bind(status)
                .bind(Utc::now())
                .bind(exec_id)
                .execute(pool)
                .await
        } else {
            sqlx::query("UPDATE executions SET status = ? WHERE exec_id = ?")
                .bind(status)
                .bind(exec_id)
                .execute(pool)
                .await
        }
    })
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(exec_id.to_owned()));
    }
    Ok(())
}

/// Oldest-first queued executions for a project, limited to `limit` rows.
pub async fn get_queued_tasks_for_project(
    pool: &SqlitePool,
    project_path: &str,
    limit: i64,
) -> Result<Vec<Execution>> {
    sqlx::query_as::<_, Execution>(
        "SELECT * FROM executions WHERE project_path = ? AND status = 'queued' \
         ORDER BY created_at ASC LIMIT ?",
    )
    .bind(project_path)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(StoreError::Db)
}

/// True iff any execution for `task_id` is currently queued or running.
pub async fn is_task_queued(pool: &SqlitePool, task_id: &str) -> Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM executions WHERE task_id = ? AND status IN ('queued', 'running'))",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .map_err(StoreError::Db)
}

/// Running executions whose `created_at` is older than `older_than` relative
/// to `now`.
///
/// When `older_than` is [`Duration::ZERO`] this matches every running
/// execution, since every `created_at` is strictly in the past relative to
/// `now` — this is the documented "0 means everything is stale" crash
/// recovery semantics used by `Dispatcher::Start`.
pub async fn get_stale_running_executions(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    older_than: Duration,
) -> Result<Vec<Execution>> {
    let cutoff = now
        - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());

    sqlx::query_as::<_, Execution>(
        "SELECT * FROM executions WHERE status = 'running' AND created_at < ? ORDER BY created_at ASC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .map_err(StoreError::Db)
}

/// All currently-running executions, across every project.
///
/// Used by the CLI's `worker-status` printer, which has no access to a live
/// `Dispatcher`'s in-memory worker map when run as a separate one-shot
/// process — the store is the only state shared across process boundaries.
pub async fn get_running_executions(pool: &SqlitePool) -> Result<Vec<Execution>> {
    sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE status = 'running'")
        .fetch_all(pool)
        .await
        .map_err(StoreError::Db)
}

/// Count of rate-limited executions (`status = 'cancelled'` with a
/// `"deferred: ..."` error, the marker the dispatcher writes when a run is
/// classified as rate-limited) whose task has not since been re-queued.
///
/// Used by the CLI's `scheduler-status` printer as a best-effort,
/// store-derived stand-in for a live `Scheduler`'s in-memory pending-retry
/// count, which — like the worker map above — is not visible outside the
/// `serve` process that owns it.
pub async fn count_pending_retries(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM executions e1 \
         WHERE e1.status = 'cancelled' AND e1.error LIKE 'deferred:%' \
         AND NOT EXISTS ( \
             SELECT 1 FROM executions e2 \
             WHERE e2.task_id = e1.task_id AND e2.status IN ('queued', 'running') \
         )",
    )
    .fetch_one(pool)
    .await
    .map_err(StoreError::Db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use std::collections::BTreeSet;

    async fn temp_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::StoreConfig::new(dir.path().join("pilot.db"));
        let pool = crate::pool::create_pool(&config).await.unwrap();
        crate::pool::run_migrations(&pool, crate::pool::default_migrations_path())
            .await
            .unwrap();
        (dir, pool)
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_owned(),
            title: "do a thing".into(),
            description: "description".into(),
            project_path: "/tmp/project".into(),
            branch: None,
            create_pr: false,
            labels: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let (_dir, pool) = temp_pool().await;
        let task = task("T-1");
        let exec = Execution::new_queued("e1".into(), &task);
        save_execution(&pool, &exec).await.unwrap();

        let fetched = get_execution(&pool, "e1").await.unwrap();
        assert_eq!(fetched.task_id, "T-1");
        assert_eq!(fetched.status, ExecutionStatus::Queued);
    }

    #[tokio::test]
    async fn duplicate_submit_is_rejected() {
        let (_dir, pool) = temp_pool().await;
        let task = task("T-2");
        save_execution(&pool, &Execution::new_queued("e1".into(), &task))
            .await
            .unwrap();

        let err = save_execution(&pool, &Execution::new_queued("e2".into(), &task))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == "T-2"));
    }

    #[tokio::test]
    async fn duplicate_submit_allowed_after_completion() {
        let (_dir, pool) = temp_pool().await;
        let task = task("T-3");
        save_execution(&pool, &Execution::new_queued("e1".into(), &task))
            .await
            .unwrap();
        update_execution_status(&pool, "e1", ExecutionStatus::Completed, None)
            .await
            .unwrap();

        save_execution(&pool, &Execution::new_queued("e2".into(), &task))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn terminal_update_sets_completed_at() {
        let (_dir, pool) = temp_pool().await;
        let task = task("T-4");
        save_execution(&pool, &Execution::new_queued("e1".into(), &task))
            .await
            .unwrap();

        update_execution_status(&pool, "e1", ExecutionStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let fetched = get_execution(&pool, "e1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Failed);
        assert!(fetched.completed_at.is_some());
        assert_eq!(fetched.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn update_missing_execution_is_not_found() {
        let (_dir, pool) = temp_pool().await;
        let err = update_execution_status(&pool, "missing", ExecutionStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn queued_tasks_for_project_ordered_oldest_first() {
        let (_dir, pool) = temp_pool().await;
        for i in 0..3 {
            let t = task(&format!("T-{i}"));
            save_execution(&pool, &Execution::new_queued(format!("e{i}"), &t))
                .await
                .unwrap();
        }
        let queued = get_queued_tasks_for_project(&pool, "/tmp/project", 10)
            .await
            .unwrap();
        assert_eq!(queued.len(), 3);
        assert_eq!(queued[0].exec_id, "e0");
        assert_eq!(queued[2].exec_id, "e2");
    }

    #[tokio::test]
    async fn stale_running_zero_threshold_matches_everything() {
        let (_dir, pool) = temp_pool().await;
        let task = task("T-5");
        save_execution(&pool, &Execution::new_queued("e1".into(), &task))
            .await
            .unwrap();
        update_execution_status(&pool, "e1", ExecutionStatus::Running, None)
            .await
            .unwrap();

        let stale = get_stale_running_executions(&pool, Utc::now(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].exec_id, "e1");
    }

    #[tokio::test]
    async fn stale_running_respects_threshold() {
        let (_dir, pool) = temp_pool().await;
        let task = task("T-6");
        save_execution(&pool, &Execution::new_queued("e1".into(), &task))
            .await
            .unwrap();
        update_execution_status(&pool, "e1", ExecutionStatus::Running, None)
            .await
            .unwrap();

        // started "now", so a 30 minute staleness window should not flag it.
        let stale = get_stale_running_executions(&pool, Utc::now(), Duration::from_secs(1800))
            .await
            .unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn is_task_queued_reflects_active_rows_only() {
        let (_dir, pool) = temp_pool().await;
        let task = task("T-7");
        assert!(!is_task_queued(&pool, "T-7").await.unwrap());

        save_execution(&pool, &Execution::new_queued("e1".into(), &task))
            .await
            .unwrap();
        assert!(is_task_queued(&pool, "T-7").await.unwrap());

        update_execution_status(&pool, "e1", ExecutionStatus::Completed, None)
            .await
            .unwrap();
        assert!(!is_task_queued(&pool, "T-7").await.unwrap());
    }

    #[tokio::test]
    async fn get_running_executions_returns_only_running_rows() {
        let (_dir, pool) = temp_pool().await;
        let t1 = task("T-8");
        let t2 = task("T-9");
        save_execution(&pool, &Execution::new_queued("e1".into(), &t1))
            .await
            .unwrap();
        save_execution(&pool, &Execution::new_queued("e2".into(), &t2))
            .await
            .unwrap();
        update_execution_status(&pool, "e1", ExecutionStatus::Running, None)
            .await
            .unwrap();

        let running = get_running_executions(&pool).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].exec_id, "e1");
    }

    #[tokio::test]
    async fn count_pending_retries_excludes_resubmitted_tasks() {
        let (_dir, pool) = temp_pool().await;
        let t1 = task("T-10");
        save_execution(&pool, &Execution::new_queued("e1".into(), &t1))
            .await
            .unwrap();
        update_execution_status(
            &pool,
            "e1",
            ExecutionStatus::Cancelled,
            Some("deferred: rate limited, retry after 60s"),
        )
        .await
        .unwrap();

        assert_eq!(count_pending_retries(&pool).await.unwrap(), 1);

        save_execution(&pool, &Execution::new_queued("e2".into(), &t1))
            .await
            .unwrap();
        assert_eq!(count_pending_retries(&pool).await.unwrap(), 0);
    }
}
