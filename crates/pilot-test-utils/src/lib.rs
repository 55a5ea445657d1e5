//! Shared test utilities for pilot integration tests.
//!
//! The execution store is an embedded, file-backed SQLite database, so
//! unlike a networked store there is no shared container to manage: each
//! test gets its own throwaway database file in a [`tempfile::TempDir`].

use std::sync::Mutex;

use sqlx::SqlitePool;

use pilot_store::config::StoreConfig;
use pilot_store::pool;

/// Create a fresh, migrated store in a temp directory.
///
/// Returns the `TempDir` alongside the pool; the directory (and its `.db`
/// file) is removed when the `TempDir` is dropped, so callers must keep it
/// alive for the duration of the test.
pub async fn temp_store() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = StoreConfig::new(dir.path().join("pilot.db"));
    let db_pool = pool::create_pool(&config)
        .await
        .expect("failed to open temp store");
    pool::run_migrations(&db_pool, pool::default_migrations_path())
        .await
        .expect("failed to run migrations");
    (dir, db_pool)
}

/// Write an executable shell script to a temp directory that echoes the
/// given lines to stdout, one per `echo`, simulating a stream-JSON backend.
///
/// Returns `(tempdir, script_path)`; the tempdir must be kept alive for the
/// script to remain on disk.
pub fn spawn_fake_agent_script(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let script_path = dir.path().join("fake_agent.sh");

    let mut body = String::from("#!/bin/sh\n");
    for line in lines {
        body.push_str("echo '");
        body.push_str(&line.replace('\'', "'\\''"));
        body.push_str("'\n");
    }
    std::fs::write(&script_path, body).expect("failed to write fake agent script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod fake agent script");
    }

    (dir, script_path)
}

/// Serializes tests that mutate process-wide environment variables.
///
/// `std::env::set_var`/`remove_var` are unsafe as of the 2024 edition
/// because they race with concurrent reads from other threads; tests that
/// need to set env vars should acquire this lock for the duration of the
/// mutation and assertions.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
}
