use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Non-terminal statuses participate in the duplicate-submit guard and
    /// occupy a project's single worker slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionStatus {
    type Err = ExecutionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ExecutionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ExecutionStatus`] string.
#[derive(Debug, Clone)]
pub struct ExecutionStatusParseError(pub String);

impl fmt::Display for ExecutionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution status: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionStatusParseError {}

// ---------------------------------------------------------------------------
// ComplexityClass
// ---------------------------------------------------------------------------

/// Task sizing used by the classifier and decomposer. Ordered from least to
/// most involved so callers can compare against a configured threshold with
/// `>=`/`<`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComplexityClass {
    Trivial,
    Simple,
    Medium,
    Complex,
    Epic,
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
            Self::Epic => "epic",
        };
        f.write_str(s)
    }
}

impl FromStr for ComplexityClass {
    type Err = ComplexityClassParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trivial" => Ok(Self::Trivial),
            "simple" => Ok(Self::Simple),
            "medium" => Ok(Self::Medium),
            "complex" => Ok(Self::Complex),
            "epic" => Ok(Self::Epic),
            other => Err(ComplexityClassParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComplexityClassParseError(pub String);

impl fmt::Display for ComplexityClassParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid complexity class: {:?}", self.0)
    }
}

impl std::error::Error for ComplexityClassParseError {}

// ---------------------------------------------------------------------------
// Task / Execution
// ---------------------------------------------------------------------------

/// A work unit submitted by a caller. Immutable within the core once
/// submitted; `project_path` is the partition key workers serialize on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub project_path: String,
    pub branch: Option<String>,
    pub create_pr: bool,
    pub labels: BTreeSet<String>,
}

impl Task {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Durable record of one attempted run of a [`Task`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: String,
    pub task_id: String,
    pub project_path: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    // Denormalized task snapshot, so a crash-recovered execution can be
    // resumed without the caller re-submitting the task body.
    pub task_title: String,
    pub task_description: String,
    pub task_branch: Option<String>,
    pub task_create_pr: bool,
}

impl Execution {
    /// Build a fresh `queued` execution from a submitted task.
    pub fn new_queued(exec_id: String, task: &Task) -> Self {
        Self {
            exec_id,
            task_id: task.id.clone(),
            project_path: task.project_path.clone(),
            status: ExecutionStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            task_title: task.title.clone(),
            task_description: task.description.clone(),
            task_branch: task.branch.clone(),
            task_create_pr: task.create_pr,
        }
    }
}
