//! Complexity classifier and task decomposer.

mod decomposer;
mod engine;
mod error;
mod types;

pub use decomposer::{execute_sub_issues, Decomposer};
pub use engine::Classifier;
pub use error::ClassifierError;
pub use types::{DecomposerConfig, PrCreatedCallback, SubIssue, SubIssueExecutor};
