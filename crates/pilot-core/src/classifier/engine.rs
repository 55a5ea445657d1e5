//! Complexity classifier: primary LLM-subprocess path with a keyword
//! heuristic fallback, cached per task id for the process lifetime.

use std::collections::HashMap;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;

use pilot_store::{ComplexityClass, Task};

/// Task text past this many characters is truncated before being sent to
/// the classifier subprocess.
const MAX_TASK_CHARS: usize = 4000;

const CLASSIFY_PROMPT: &str = "\
Classify the complexity of the following software task. Respond with a \
single JSON object of the form {\"complexity\":\"trivial|simple|medium|complex|epic\",\"reason\":\"...\"} \
and nothing else.\n\nTask:\n";

#[derive(Debug, Deserialize)]
struct Verdict {
    complexity: String,
    #[allow(dead_code)]
    reason: Option<String>,
}

/// Invokes an external LLM subprocess to size a task, falling back to a
/// keyword heuristic when the subprocess is unavailable or returns
/// something unparseable.
pub struct Classifier {
    command: String,
    args: Vec<String>,
    cache: Mutex<HashMap<String, ComplexityClass>>,
}

impl Classifier {
    /// `command` is the LLM CLI to invoke (resolved via `$PATH`); `args` are
    /// passed ahead of the prompt, which is written to stdin.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classify `task`, consulting the per-process cache first.
    pub async fn classify(&self, task: &Task) -> ComplexityClass {
        if task.title.trim().is_empty() && task.description.trim().is_empty() {
            return ComplexityClass::Medium;
        }

        if let Some(cached) = self.cache.lock().await.get(&task.id) {
            return *cached;
        }

        let class = match self.classify_via_subprocess(task).await {
            Some(class) => class,
            None => classify_by_keyword(&task.title, &task.description),
        };

        self.cache.lock().await.insert(task.id.clone(), class);
        class
    }

    async fn classify_via_subprocess(&self, task: &Task) -> Option<ComplexityClass> {
        let text = truncate_task_text(&task.title, &task.description);
        let prompt = format!("{CLASSIFY_PROMPT}{text}");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| warn!(error = %e, "classifier subprocess failed to spawn, falling back to heuristic"))
            .ok()?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes()).await;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| warn!(error = %e, "classifier subprocess failed, falling back to heuristic"))
            .ok()?;

        if !output.status.success() {
            warn!(
                status = %output.status,
                "classifier subprocess exited non-zero, falling back to heuristic"
            );
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stripped = strip_code_fence(stdout.trim());

        match serde_json::from_str::<Verdict>(stripped) {
            Ok(verdict) => match verdict.complexity.parse::<ComplexityClass>() {
                Ok(class) => Some(class),
                Err(_) => {
                    warn!(value = %verdict.complexity, "classifier subprocess returned an unknown complexity, falling back to heuristic");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "classifier subprocess output was not valid JSON, falling back to heuristic");
                None
            }
        }
    }
}

fn truncate_task_text(title: &str, description: &str) -> String {
    let combined = format!("{title}\n\n{description}");
    if combined.len() <= MAX_TASK_CHARS {
        combined
    } else {
        let mut truncated = combined
            .char_indices()
            .take_while(|(i, _)| *i < MAX_TASK_CHARS)
            .map(|(_, c)| c)
            .collect::<String>();
        truncated.push_str("…[truncated]");
        truncated
    }
}

fn strip_code_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn classify_by_keyword(title: &str, description: &str) -> ComplexityClass {
    let combined = format!("{title} {description}").to_ascii_lowercase();

    if ["typo", "rename", "log"].iter().any(|kw| combined.contains(kw)) {
        return ComplexityClass::Trivial;
    }

    let word_count = combined.split_whitespace().count();
    if word_count < 10 {
        return ComplexityClass::Simple;
    }

    if ["refactor", "migration", "system"].iter().any(|kw| combined.contains(kw)) {
        return ComplexityClass::Complex;
    }

    ComplexityClass::Medium
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn task(title: &str, description: &str) -> Task {
        Task {
            id: "T-1".to_string(),
            title: title.to_string(),
            description: description.to_string(),
            project_path: "/tmp/project".to_string(),
            branch: None,
            create_pr: false,
            labels: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn empty_task_classifies_as_medium() {
        let classifier = Classifier::new("definitely-not-a-real-binary-xyz", Vec::new());
        let class = classifier.classify(&task("", "")).await;
        assert_eq!(class, ComplexityClass::Medium);
    }

    #[tokio::test]
    async fn missing_subprocess_falls_back_to_keyword_heuristic() {
        let classifier = Classifier::new("definitely-not-a-real-binary-xyz", Vec::new());
        assert_eq!(
            classifier.classify(&task("fix typo in readme", "")).await,
            ComplexityClass::Trivial
        );

        let short = task("short", "a few words only");
        assert_eq!(classifier.classify(&short).await, ComplexityClass::Simple);

        let long = task(
            "rewrite the billing subsystem",
            "this requires a large-scale refactor of the migration path across every downstream service",
        );
        assert_eq!(classifier.classify(&long).await, ComplexityClass::Complex);

        let medium = task(
            "add a new field",
            "add a new optional field to the settings struct and thread it through the API handlers",
        );
        assert_eq!(classifier.classify(&medium).await, ComplexityClass::Medium);
    }

    #[tokio::test]
    async fn result_is_cached_per_task_id() {
        let classifier = Classifier::new("definitely-not-a-real-binary-xyz", Vec::new());
        let first = task("fix typo", "");
        let class_a = classifier.classify(&first).await;

        let mut second = task("a totally different long refactor migration task", "");
        second.id = first.id.clone();
        let class_b = classifier.classify(&second).await;

        assert_eq!(class_a, class_b);
    }

    #[test]
    fn strips_json_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"x\":1}\n```"), "{\"x\":1}");
        assert_eq!(strip_code_fence("{\"x\":1}"), "{\"x\":1}");
    }

    #[test]
    fn truncates_long_task_text_with_sentinel() {
        let long_description = "a".repeat(MAX_TASK_CHARS + 100);
        let truncated = truncate_task_text("title", &long_description);
        assert!(truncated.ends_with("…[truncated]"));
        assert!(truncated.len() < long_description.len());
    }
}
