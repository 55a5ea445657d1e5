//! Splits a task into an ordered list of child tasks along structural
//! boundaries (numbered or bulleted lines), and drives their sequential
//! execution once issues exist for them upstream.

use std::sync::OnceLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use pilot_store::Task;

use super::engine::Classifier;
use super::error::ClassifierError;
use super::types::{DecomposerConfig, PrCreatedCallback, SubIssue, SubIssueExecutor};

fn structural_item_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:\d+\.|[-*])\s+(.+)$").expect("valid regex"))
}

/// Splits tasks into ordered child tasks, honoring the configured
/// complexity/description-size gates and an optional override decision from
/// a prior LLM call.
pub struct Decomposer {
    classifier: std::sync::Arc<Classifier>,
    config: DecomposerConfig,
}

impl Decomposer {
    pub fn new(classifier: std::sync::Arc<Classifier>, config: DecomposerConfig) -> Self {
        Self { classifier, config }
    }

    /// Returns the ordered child tasks, or an empty vec if `task` should not
    /// be decomposed (including the case where no structural split is
    /// found).
    ///
    /// `override_decision`, when set, takes precedence over the heuristic
    /// gates: `Some(true)` forces an attempt even for a short description,
    /// `Some(false)` forces a skip.
    pub async fn decompose(&self, task: &Task, override_decision: Option<bool>) -> Vec<Task> {
        if task.has_label("no-decompose") {
            return Vec::new();
        }
        if !self.config.enabled {
            return Vec::new();
        }
        if override_decision == Some(false) {
            return Vec::new();
        }

        if override_decision != Some(true) {
            let complexity = self.classifier.classify(task).await;
            if complexity < self.config.min_complexity {
                return Vec::new();
            }
            let word_count = task.description.split_whitespace().count();
            if word_count < self.config.min_description_words {
                return Vec::new();
            }
        }

        split_structurally(task, self.config.max_subtasks)
    }
}

fn split_structurally(task: &Task, max_subtasks: usize) -> Vec<Task> {
    let items: Vec<String> = structural_item_pattern()
        .captures_iter(&task.description)
        .map(|c| c[1].trim().to_string())
        .collect();

    if items.is_empty() {
        return Vec::new();
    }

    let items = cap_with_overflow_merged(items, max_subtasks);

    items
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let order = i + 1;
            Task {
                id: format!("{}-{}", task.id, order),
                title: first_sentence(&text),
                description: text,
                project_path: task.project_path.clone(),
                branch: task.branch.clone(),
                create_pr: task.create_pr,
                labels: task.labels.clone(),
            }
        })
        .collect()
}

/// If `items` exceeds `max_subtasks`, concatenate the overflow into the
/// last retained item instead of dropping it.
fn cap_with_overflow_merged(mut items: Vec<String>, max_subtasks: usize) -> Vec<String> {
    if max_subtasks == 0 || items.len() <= max_subtasks {
        return items;
    }
    let overflow = items.split_off(max_subtasks);
    if let Some(last) = items.last_mut() {
        for extra in overflow {
            last.push('\n');
            last.push_str(&extra);
        }
    }
    items
}

fn first_sentence(text: &str) -> String {
    text.split(['.', '\n'])
        .next()
        .unwrap_or(text)
        .trim()
        .to_string()
}

/// Runs each sub-issue through `executor` in order, invoking
/// `on_pr_created` when a run succeeds with a non-empty PR URL. Aborts and
/// returns an error on the first failure, or immediately on cancellation
/// between children.
pub async fn execute_sub_issues(
    parent: &Task,
    issues: &[SubIssue],
    executor: SubIssueExecutor,
    on_pr_created: Option<PrCreatedCallback>,
    cancel: CancellationToken,
) -> Result<(), ClassifierError> {
    if issues.is_empty() {
        return Err(ClassifierError::NoSubIssues);
    }

    for issue in issues {
        if cancel.is_cancelled() {
            return Err(ClassifierError::Cancelled {
                issue_number: issue.issue_number,
            });
        }

        let child = Task {
            id: format!("{}-{}", parent.id, issue.issue_number),
            title: issue.title.clone(),
            description: issue.description.clone(),
            project_path: parent.project_path.clone(),
            branch: Some(format!("{}/{}-{}", parent.id, parent.id, issue.issue_number)),
            create_pr: true,
            labels: parent.labels.clone(),
        };

        let result = executor(child).await.map_err(|e| ClassifierError::SubIssueFailed {
            issue_number: issue.issue_number,
            message: e.to_string(),
        })?;

        if !result.success {
            return Err(ClassifierError::SubIssueFailed {
                issue_number: issue.issue_number,
                message: result.error.unwrap_or_else(|| "run did not succeed".to_string()),
            });
        }

        if let (Some(callback), Some(pr_url)) = (&on_pr_created, result.pr_url.filter(|u| !u.is_empty())) {
            let pr_number = pr_url
                .rsplit('/')
                .next()
                .and_then(|segment| segment.parse::<u64>().ok())
                .unwrap_or(0);
            callback(
                pr_number,
                pr_url,
                issue.issue_number,
                result.commit_sha.unwrap_or_default(),
                child_branch(parent, issue),
            );
        }
    }

    Ok(())
}

fn child_branch(parent: &Task, issue: &SubIssue) -> String {
    format!("{}/{}-{}", parent.id, parent.id, issue.issue_number)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::backend::ExecutionResult;

    use super::*;

    fn task(description: &str) -> Task {
        Task {
            id: "T-1".to_string(),
            title: "parent task".to_string(),
            description: description.to_string(),
            project_path: "/tmp/project".to_string(),
            branch: None,
            create_pr: false,
            labels: BTreeSet::new(),
        }
    }

    fn classifier() -> Arc<Classifier> {
        Arc::new(Classifier::new("definitely-not-a-real-binary-xyz", Vec::new()))
    }

    #[tokio::test]
    async fn label_no_decompose_skips_unconditionally() {
        let mut t = task("1. one\n2. two\n3. three extra words to pass gates here for sure yes");
        t.labels.insert("no-decompose".to_string());
        let decomposer = Decomposer::new(classifier(), DecomposerConfig::default());
        assert!(decomposer.decompose(&t, None).await.is_empty());
    }

    #[tokio::test]
    async fn disabled_config_skips() {
        let t = task("1. one\n2. two\n3. three extra words to pass gates here for sure yes");
        let decomposer = Decomposer::new(
            classifier(),
            DecomposerConfig {
                enabled: false,
                ..DecomposerConfig::default()
            },
        );
        assert!(decomposer.decompose(&t, None).await.is_empty());
    }

    #[tokio::test]
    async fn override_true_forces_split_even_for_short_description() {
        let t = task("1. one\n2. two");
        let decomposer = Decomposer::new(classifier(), DecomposerConfig::default());
        let children = decomposer.decompose(&t, Some(true)).await;
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, "T-1-1");
        assert_eq!(children[1].id, "T-1-2");
    }

    #[tokio::test]
    async fn override_false_forces_skip() {
        let t = task(
            "1. step one with quite a lot of extra detail words here to pass every gate comfortably\n\
             2. step two with quite a lot of extra detail words here to pass every gate comfortably",
        );
        let decomposer = Decomposer::new(classifier(), DecomposerConfig::default());
        assert!(decomposer.decompose(&t, Some(false)).await.is_empty());
    }

    #[tokio::test]
    async fn max_subtasks_merges_overflow_into_last_child() {
        let description = (1..=5)
            .map(|i| format!("{i}. item number {i} with plenty of words to satisfy the gates comfortably"))
            .collect::<Vec<_>>()
            .join("\n");
        let t = task(&description);
        let decomposer = Decomposer::new(
            classifier(),
            DecomposerConfig {
                max_subtasks: 3,
                min_description_words: 0,
                min_complexity: pilot_store::ComplexityClass::Trivial,
                ..DecomposerConfig::default()
            },
        );
        let children = decomposer.decompose(&t, Some(true)).await;
        assert_eq!(children.len(), 3);
        assert!(children[2].description.contains("item number 4"));
        assert!(children[2].description.contains("item number 5"));
    }

    #[tokio::test]
    async fn execute_sub_issues_rejects_empty_list() {
        let parent = task("parent");
        let executor: SubIssueExecutor = Arc::new(|_| Box::pin(async { Ok(ExecutionResult::default()) }));
        let err = execute_sub_issues(&parent, &[], executor, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::NoSubIssues));
    }

    #[tokio::test]
    async fn execute_sub_issues_runs_in_order_and_invokes_pr_callback() {
        let parent = task("parent");
        let issues = vec![
            SubIssue {
                issue_number: 101,
                title: "first".to_string(),
                description: "do the first thing".to_string(),
            },
            SubIssue {
                issue_number: 102,
                title: "second".to_string(),
                description: "do the second thing".to_string(),
            },
        ];

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_clone = order.clone();
        let executor: SubIssueExecutor = Arc::new(move |child| {
            let order = order_clone.clone();
            Box::pin(async move {
                order.lock().unwrap().push(child.id.clone());
                Ok(ExecutionResult {
                    success: true,
                    pr_url: Some(format!("https://example.com/pr/{}", child.id)),
                    commit_sha: Some("abc123".to_string()),
                    ..Default::default()
                })
            })
        });

        let pr_calls = Arc::new(AtomicUsize::new(0));
        let pr_calls_clone = pr_calls.clone();
        let on_pr_created: PrCreatedCallback = Arc::new(move |_, _, _, _, _| {
            pr_calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        execute_sub_issues(
            &parent,
            &issues,
            executor,
            Some(on_pr_created),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["T-1-101", "T-1-102"]);
        assert_eq!(pr_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execute_sub_issues_aborts_remaining_on_failure() {
        let parent = task("parent");
        let issues = vec![
            SubIssue {
                issue_number: 1,
                title: "first".to_string(),
                description: "fails".to_string(),
            },
            SubIssue {
                issue_number: 2,
                title: "second".to_string(),
                description: "never runs".to_string(),
            },
        ];

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let executor: SubIssueExecutor = Arc::new(move |_| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ExecutionResult {
                    success: false,
                    error: Some("boom".to_string()),
                    ..Default::default()
                })
            })
        });

        let err = execute_sub_issues(&parent, &issues, executor, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::SubIssueFailed { issue_number: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_sub_issues_respects_pre_cancelled_token() {
        let parent = task("parent");
        let issues = vec![SubIssue {
            issue_number: 1,
            title: "first".to_string(),
            description: "never runs".to_string(),
        }];
        let executor: SubIssueExecutor = Arc::new(|_| Box::pin(async { Ok(ExecutionResult::default()) }));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = execute_sub_issues(&parent, &issues, executor, None, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Cancelled { issue_number: 1 }));
    }
}
