use std::pin::Pin;
use std::sync::Arc;

use pilot_store::ComplexityClass;

use crate::backend::{BackendError, ExecutionResult};

/// Tunables for [`super::Decomposer`]. Constructed by the caller; never
/// read from the environment.
#[derive(Debug, Clone, Copy)]
pub struct DecomposerConfig {
    pub enabled: bool,
    pub min_complexity: ComplexityClass,
    pub min_description_words: usize,
    pub max_subtasks: usize,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_complexity: ComplexityClass::Complex,
            min_description_words: 20,
            max_subtasks: 8,
        }
    }
}

/// A child task record that already has an issue created for it upstream,
/// as consumed by [`super::execute_sub_issues`].
#[derive(Debug, Clone)]
pub struct SubIssue {
    pub issue_number: u64,
    pub title: String,
    pub description: String,
}

type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Runs one child task through the standard execute path (backend run plus
/// whatever hook/dispatch plumbing the caller wires in) and returns its
/// outcome.
pub type SubIssueExecutor =
    Arc<dyn Fn(pilot_store::Task) -> BoxFuture<'static, Result<ExecutionResult, BackendError>> + Send + Sync>;

/// Invoked after a sub-issue's execution succeeds with a non-empty PR URL:
/// `(pr_number, pr_url, issue_number, commit_sha, branch)`. `pr_number` is
/// parsed out of `pr_url`'s trailing path segment when possible, `0`
/// otherwise.
pub type PrCreatedCallback = Arc<dyn Fn(u64, String, u64, String, String) + Send + Sync>;
