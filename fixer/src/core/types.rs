//! Shared contract types for the fix loop.
//!
//! These types define stable contracts between components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use serde::{Deserialize, Serialize};

/// Overall status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Partial,
}

/// Pair of a completed plan step and its result text.
///
/// History entries are immutable once appended. The result text carries the
/// model's final answer for the step with a digest of notable tool outcomes
/// folded in; individual tool invocations are not persisted separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Step description exactly as it appeared in the plan.
    pub step: String,
    /// Final result text for the step (may describe an error).
    pub result: String,
}

/// Tagged result of one tool invocation.
///
/// Tools never raise past this boundary: failures are carried in `message`
/// with `ok = false` so the reasoning loop reads them as observations
/// instead of aborting the step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    pub message: String,
}

impl ToolOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Terminal structured response for a run.
///
/// Every run produces exactly one of these, whatever happened along the
/// way. Optional fields are omitted from serialized output when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Brief summary of what was accomplished or why the run stopped.
    pub summary: String,
    pub status: RunStatus,
    /// Explanation of the implemented solution, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl RunOutcome {
    /// Outcome for a run that failed before producing any useful work.
    pub fn error(summary: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            summary: summary.into(),
            status: RunStatus::Error,
            solution: None,
            files_modified: None,
            pull_request_url: None,
            branch_name: None,
            errors: if errors.is_empty() {
                None
            } else {
                Some(errors)
            },
        }
    }
}

/// Read-only per-run context threaded through the planner, step executor
/// and replanner.
///
/// One instance per run; runs never share context. Credentials live in the
/// collaborators (GitHub service, model backend), not here, so they are
/// never rendered into prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Correlates state, artifacts and events for one run (e.g. `issue-42`).
    pub run_id: String,
    /// The overall objective. Never mutated after loop start.
    pub goal: String,
    /// Repository coordinate in `owner/name` form.
    pub repository: String,
    /// Branch new work forks from and pull requests target.
    pub base_branch: String,
}
