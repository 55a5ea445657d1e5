//! Stdio subprocess backend.
//!
//! Spawns an external AI coding agent as a subprocess emitting stream-JSON
//! on stdout (e.g. `claude -p --output-format stream-json`), normalizes its
//! output into [`BackendEvent`]s, and enforces the heartbeat/watchdog
//! liveness gates and shutdown protocol described in the backend adapter
//! design.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::classify::classify;
use super::error::BackendError;
use super::parser::parse_line;
use super::trait_def::Backend;
use super::types::{BackendEvent, ErrorClass, ExecuteOptions, ExecutionResult};

/// Stderr captured past this many bytes is trimmed to the trailing window,
/// so a runaway process cannot pin an unbounded buffer in memory.
const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

/// Backend adapter that drives a stream-JSON-emitting CLI as a child
/// process.
#[derive(Clone)]
pub struct StdioBackend {
    command: String,
    extra_args: Vec<String>,
}

impl StdioBackend {
    /// `command` is resolved via `$PATH` unless it contains a path
    /// separator.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

impl std::fmt::Debug for StdioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioBackend")
            .field("command", &self.command)
            .finish()
    }
}

fn resolve_on_path(command: &str) -> Option<std::path::PathBuf> {
    if command.contains(std::path::MAIN_SEPARATOR) {
        let path = std::path::PathBuf::from(command);
        return path.is_file().then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl Backend for StdioBackend {
    fn name(&self) -> &str {
        "stdio"
    }

    async fn is_available(&self) -> bool {
        resolve_on_path(&self.command).is_some()
    }

    async fn execute(
        &self,
        opts: ExecuteOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, BackendError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .args(&self.extra_args);
        if opts.verbose {
            cmd.arg("--verbose");
        }
        if let Some(model) = &opts.model {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(&opts.project_path);
        for (key, value) in &opts.env_vars {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            // New process group so shutdown can signal the whole descendant
            // tree, not just the direct child.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(BackendError::SubprocessSpawn)?;
        let pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(opts.prompt.as_bytes()).await;
            // Dropping closes the write end so a `-p`-style backend that
            // reads its prompt until EOF can start working.
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stderr_task = tokio::spawn(capture_stderr(stderr));

        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if line_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading backend stdout");
                        break;
                    }
                }
            }
        });

        let last_event = Arc::new(Mutex::new(Instant::now()));
        let heartbeat_fired = AtomicBool::new(false);

        let mut result = ExecutionResult::default();
        let mut saw_result_event = false;
        let mut shutdown_reason: Option<BackendError> = None;

        let mut heartbeat_ticker = tokio::time::interval(opts.heartbeat_check_interval);
        heartbeat_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let watchdog_timeout = opts.watchdog_timeout.filter(|d| !d.is_zero());
        tokio::pin! {
            let watchdog_sleep = async {
                match watchdog_timeout {
                    Some(d) => {
                        tokio::time::sleep(d).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
        }

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    shutdown_reason = Some(BackendError::Cancelled);
                    break;
                }

                _ = &mut watchdog_sleep => {
                    if let Some(cb) = &opts.watchdog_callback {
                        cb(pid.unwrap_or(0), watchdog_timeout.unwrap_or_default());
                    }
                    shutdown_reason = Some(classified_timeout());
                    break;
                }

                maybe_line = line_rx.recv() => {
                    match maybe_line {
                        Some(line) => {
                            *last_event.lock().await = Instant::now();
                            heartbeat_fired.store(false, Ordering::SeqCst);

                            let event = parse_line(&line);
                            apply_event(&event, &mut result);
                            if matches!(event, BackendEvent::Result { .. }) {
                                saw_result_event = true;
                            }
                            (opts.event_handler)(event);
                        }
                        None => break,
                    }
                }

                _ = heartbeat_ticker.tick() => {
                    let age = last_event.lock().await.elapsed();
                    if age > opts.heartbeat_timeout && !heartbeat_fired.swap(true, Ordering::SeqCst) {
                        if let Some(cb) = &opts.heartbeat_callback {
                            cb(pid.unwrap_or(0), age);
                        }
                    }
                }
            }

            if saw_result_event {
                break;
            }
        }

        if shutdown_reason.is_some() {
            shutdown(&mut child, opts.grace_period).await;
        }
        reader_task.abort();
        let _ = reader_task.await;

        // Drain whatever is left before returning, per the shutdown protocol.
        let exit_status = child.wait().await.ok();
        let stderr_captured = stderr_task.await.unwrap_or_default();

        if let Some(err) = shutdown_reason {
            return Err(err);
        }

        let failed_by_exit = exit_status.map(|s| !s.success()).unwrap_or(false);
        if result.error.is_some() || failed_by_exit && !stderr_captured.is_empty() {
            let classified = classify(&stderr_captured);
            result.success = false;
            result.error = Some(classified.message.clone());
            return Err(BackendError::classified(classified));
        }

        result.success = true;
        Ok(result)
    }
}

fn apply_event(event: &BackendEvent, result: &mut ExecutionResult) {
    match event {
        BackendEvent::Error { message, .. } => {
            result.error = Some(message.clone());
        }
        BackendEvent::Result {
            output,
            tokens_in,
            tokens_out,
            model,
            is_error,
            ..
        } => {
            result.output = output.clone();
            result.tokens_in += tokens_in;
            result.tokens_out += tokens_out;
            if model.is_some() {
                result.model = model.clone();
            }
            if *is_error {
                result.error.get_or_insert_with(|| output.clone());
            }
        }
        _ => {}
    }
}

fn classified_timeout() -> BackendError {
    BackendError::classified(super::types::ClassifiedError {
        class: ErrorClass::Timeout,
        message: "watchdog timeout exceeded".to_string(),
        stderr: String::new(),
        rate_limit_reset: None,
    })
}

async fn capture_stderr(mut stderr: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        warn!(error = %e, "error reading backend stderr");
    }
    let text = String::from_utf8_lossy(&buf);
    if text.len() > STDERR_CAPTURE_LIMIT {
        text[text.len() - STDERR_CAPTURE_LIMIT..].to_string()
    } else {
        text.into_owned()
    }
}

/// Soft-terminate, close stdin, wait up to `grace_period`, hard-kill. Mirrors
/// the graceful-then-forced shutdown the teacher's harness adapter uses for
/// a single process, generalized to the whole process group.
async fn shutdown(child: &mut tokio::process::Child, grace_period: Duration) {
    let Some(pid) = child.id() else {
        return;
    };

    #[cfg(unix)]
    {
        // SAFETY: pid is a valid id from a child we spawned into its own
        // process group; negating targets the whole group.
        let ret = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
        if ret != 0 {
            warn!(pid, "SIGTERM to process group failed");
        }
    }

    child.stdin.take();

    let exited = tokio::time::timeout(grace_period, child.wait()).await;
    if exited.is_err() {
        debug!(pid, "process did not exit within grace period, sending SIGKILL");
        #[cfg(unix)]
        {
            // SAFETY: see above.
            unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        }
        let _ = child.wait().await;
    }
}
