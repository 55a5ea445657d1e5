/// Errors returned by [`super::execute_sub_issues`].
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("no sub-issues to execute")]
    NoSubIssues,

    #[error("cancelled before sub-issue {issue_number} started")]
    Cancelled { issue_number: u64 },

    #[error("sub-issue {issue_number} failed: {message}")]
    SubIssueFailed { issue_number: u64, message: String },
}
