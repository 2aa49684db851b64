//! Best-effort outcome synthesis from run history.
//!
//! When the replanner emits output that fails schema validation, or a run
//! ends without an explicit final response, the loop still owes the caller
//! a structured outcome. This module scans the history text for completion
//! signals (pull-request URL, branch creation, file updates, error
//! markers) and derives the closest honest [`RunOutcome`].

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ExecutionRecord, RunOutcome, RunStatus};

static PR_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://github\.com/[^/\s]+/[^/\s]+/pull/\d+").unwrap()
});
static PR_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)pull request (?:created|opened|for '[^']+' already exists)").unwrap()
});
static BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)branch '([^']+)' (?:created|already exists)").unwrap()
});
static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)file '([^']+)' (?:updated|created) on branch").unwrap());
static ERROR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:error|failed)\b").unwrap());

/// Longest error excerpt kept per matching history line.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Completion signals extracted from history result texts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySignals {
    pub pull_request_url: Option<String>,
    /// True when a PR URL or a "pull request created" message was seen.
    pub has_pull_request: bool,
    pub branch_name: Option<String>,
    /// Deduplicated, sorted file paths reported as written.
    pub files_modified: Vec<String>,
    /// Excerpts of history lines that look like errors, in order.
    pub errors: Vec<String>,
}

/// Scan history result texts for completion signals.
pub fn scan_history(history: &[ExecutionRecord]) -> HistorySignals {
    let mut signals = HistorySignals::default();

    for record in history {
        if signals.pull_request_url.is_none()
            && let Some(found) = PR_URL_RE.find(&record.result)
        {
            signals.pull_request_url = Some(found.as_str().to_string());
        }
        if PR_URL_RE.is_match(&record.result) || PR_MESSAGE_RE.is_match(&record.result) {
            signals.has_pull_request = true;
        }
        if let Some(captures) = BRANCH_RE.captures(&record.result) {
            signals.branch_name = Some(captures[1].to_string());
        }
        for captures in FILE_RE.captures_iter(&record.result) {
            signals.files_modified.push(captures[1].to_string());
        }
        for line in record.result.lines() {
            if ERROR_LINE_RE.is_match(line) {
                signals.errors.push(truncate_chars(line.trim(), ERROR_EXCERPT_CHARS));
            }
        }
    }

    signals.files_modified.sort();
    signals.files_modified.dedup();
    signals
}

/// Synthesize a structured outcome for a run that ended without a usable
/// final response.
///
/// Status derivation: `error` when error markers were seen, otherwise
/// `success` when a pull request signal exists, otherwise `partial`. A
/// run only counts as successful once a pull request is on record.
pub fn synthesize_outcome(goal: &str, history: &[ExecutionRecord]) -> RunOutcome {
    let signals = scan_history(history);

    let status = if !signals.errors.is_empty() {
        RunStatus::Error
    } else if signals.has_pull_request {
        RunStatus::Success
    } else {
        RunStatus::Partial
    };

    let goal_line = first_line(goal);
    let (summary, solution) = match status {
        RunStatus::Success => (
            format!("Fixed '{goal_line}' and created a pull request"),
            "A pull request with the fix was created.".to_string(),
        ),
        RunStatus::Error => (
            format!("Attempted '{goal_line}' but hit errors"),
            "Some steps reported errors; see the errors list.".to_string(),
        ),
        RunStatus::Partial => match &signals.branch_name {
            Some(branch) => (
                format!("Partially fixed '{goal_line}': branch created but no pull request"),
                format!("Created branch '{branch}' with changes, but no pull request was opened."),
            ),
            None => (
                format!("Attempted '{goal_line}' but the process is incomplete"),
                "Work started but changes were not submitted.".to_string(),
            ),
        },
    };

    RunOutcome {
        summary,
        status,
        solution: Some(solution),
        files_modified: (!signals.files_modified.is_empty()).then_some(signals.files_modified),
        pull_request_url: signals.pull_request_url,
        branch_name: signals.branch_name,
        errors: (!signals.errors.is_empty()).then_some(signals.errors),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: &str, result: &str) -> ExecutionRecord {
        ExecutionRecord {
            step: step.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn pr_url_yields_success_with_url() {
        let history = vec![
            record("inspect", "read 3 files"),
            record(
                "open pr",
                "Opened https://github.com/acme/widget/pull/17 for review",
            ),
        ];

        let outcome = synthesize_outcome("fix the bug", &history);
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(
            outcome.pull_request_url.as_deref(),
            Some("https://github.com/acme/widget/pull/17")
        );
    }

    #[test]
    fn branch_without_pr_yields_partial() {
        let history = vec![record("branch", "Branch 'fix/missing-colon' created")];

        let outcome = synthesize_outcome("fix the bug", &history);
        assert_eq!(outcome.status, RunStatus::Partial);
        assert_eq!(outcome.branch_name.as_deref(), Some("fix/missing-colon"));
        assert!(outcome.pull_request_url.is_none());
    }

    #[test]
    fn already_exists_branch_is_not_an_error() {
        let history = vec![record("branch", "Branch 'fix/dup' already exists")];

        let outcome = synthesize_outcome("fix", &history);
        assert_ne!(outcome.status, RunStatus::Error);
        assert_eq!(outcome.branch_name.as_deref(), Some("fix/dup"));
    }

    #[test]
    fn existing_pull_request_counts_as_submitted() {
        let history = vec![record(
            "open pr",
            "create_pull_request: Pull request for 'fix/colon' already exists",
        )];

        let outcome = synthesize_outcome("fix", &history);
        assert_eq!(outcome.status, RunStatus::Success);
        assert!(outcome.pull_request_url.is_none());
    }

    #[test]
    fn error_lines_dominate_status() {
        let history = vec![
            record(
                "open pr",
                "Opened https://github.com/acme/widget/pull/17",
            ),
            record("update", "update_file_in_branch: error: 409 conflict"),
        ];

        let outcome = synthesize_outcome("fix", &history);
        assert_eq!(outcome.status, RunStatus::Error);
        let errors = outcome.errors.expect("errors");
        assert!(errors[0].contains("409 conflict"));
    }

    #[test]
    fn files_are_deduplicated_and_sorted() {
        let history = vec![
            record("a", "File 'src/b.py' updated on branch 'fix'"),
            record("b", "File 'src/a.py' updated on branch 'fix'"),
            record("c", "File 'src/a.py' updated on branch 'fix'"),
        ];

        let signals = scan_history(&history);
        assert_eq!(
            signals.files_modified,
            vec!["src/a.py".to_string(), "src/b.py".to_string()]
        );
    }

    #[test]
    fn empty_history_is_partial() {
        let outcome = synthesize_outcome("fix", &[]);
        assert_eq!(outcome.status, RunStatus::Partial);
        assert!(outcome.files_modified.is_none());
        assert!(outcome.errors.is_none());
    }
}
