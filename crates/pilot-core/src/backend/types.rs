//! Shared types for the streaming backend adapter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

/// A normalized event emitted by the backend adapter for one line of the
/// subprocess's stream-JSON output. Every variant carries the raw line it
/// was parsed from, so callers can always fall back to it for audit or
/// unrecognised-field tolerance.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Init {
        session_id: Option<String>,
        raw: String,
    },
    Text {
        content: String,
        raw: String,
    },
    ToolUse {
        name: String,
        input: Value,
        raw: String,
    },
    ToolResult {
        output: Value,
        is_error: bool,
        raw: String,
    },
    Result {
        output: String,
        tokens_in: u64,
        tokens_out: u64,
        model: Option<String>,
        is_error: bool,
        raw: String,
    },
    Error {
        message: String,
        raw: String,
    },
    /// Valid JSON whose top-level `type` the parser does not recognise.
    Progress {
        raw: String,
    },
}

impl BackendEvent {
    pub fn raw(&self) -> &str {
        match self {
            Self::Init { raw, .. }
            | Self::Text { raw, .. }
            | Self::ToolUse { raw, .. }
            | Self::ToolResult { raw, .. }
            | Self::Result { raw, .. }
            | Self::Error { raw, .. }
            | Self::Progress { raw } => raw,
        }
    }
}

/// Final outcome of one [`super::Backend::execute`] call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model: Option<String>,
    pub commit_sha: Option<String>,
    pub pr_url: Option<String>,
}

/// Fixed error-classification taxonomy for a failed backend run (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimit,
    InvalidConfig,
    ApiError,
    Timeout,
    Unknown,
}

/// A classified terminal error from a backend invocation.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
    pub stderr: String,
    /// Populated only for `ErrorClass::RateLimit`, when a reset time could
    /// be extracted from stderr.
    pub rate_limit_reset: Option<String>,
}

pub type EventHandler = Arc<dyn Fn(BackendEvent) + Send + Sync>;
pub type LivenessCallback = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Input to [`super::Backend::execute`].
#[derive(Clone)]
pub struct ExecuteOptions {
    pub prompt: String,
    pub project_path: PathBuf,
    pub verbose: bool,
    pub model: Option<String>,
    pub env_vars: HashMap<String, String>,
    pub event_handler: EventHandler,
    pub heartbeat_check_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub heartbeat_callback: Option<LivenessCallback>,
    /// `None`/zero disables the watchdog.
    pub watchdog_timeout: Option<Duration>,
    pub watchdog_callback: Option<LivenessCallback>,
    pub grace_period: Duration,
}

impl ExecuteOptions {
    /// The defaults named in §4.2: 30s heartbeat check, 5min heartbeat
    /// timeout, 5s shutdown grace period, watchdog disabled.
    pub fn new(prompt: impl Into<String>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            project_path: project_path.into(),
            verbose: false,
            model: None,
            env_vars: HashMap::new(),
            event_handler: Arc::new(|_| {}),
            heartbeat_check_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(300),
            heartbeat_callback: None,
            watchdog_timeout: None,
            watchdog_callback: None,
            grace_period: Duration::from_secs(5),
        }
    }
}
