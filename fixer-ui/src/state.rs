//! Shared application state for the UI server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

use fixer::core::types::RunOutcome;
use fixer::events::RunEvent;
use fixer::io::config::FixerConfig;

/// Lifecycle of a run started through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunLifecycle {
    Running,
    Finished,
}

/// Registry entry for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub run_id: String,
    pub repository: String,
    pub goal: String,
    pub lifecycle: RunLifecycle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Root directory run artifacts are written under (contains .fixer/).
    pub project_dir: PathBuf,
    pub config: Arc<FixerConfig>,
    /// GitHub token handed to each run's service.
    pub token: Arc<String>,
    /// Known runs keyed by run id.
    pub runs: Arc<Mutex<HashMap<String, RunEntry>>>,
    /// Broadcast sender for control-loop events.
    pub event_tx: Arc<broadcast::Sender<RunEvent>>,
}

impl AppState {
    pub fn new(project_dir: PathBuf, config: FixerConfig, token: String) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            project_dir,
            config: Arc::new(config),
            token: Arc::new(token),
            runs: Arc::new(Mutex::new(HashMap::new())),
            event_tx: Arc::new(event_tx),
        }
    }

    /// Insert a run entry; returns false when the id is already taken by a
    /// run that has not finished.
    pub fn try_insert_run(&self, entry: RunEntry) -> bool {
        let mut runs = self.runs.lock().expect("runs lock poisoned");
        if let Some(existing) = runs.get(&entry.run_id)
            && existing.lifecycle == RunLifecycle::Running
        {
            return false;
        }
        runs.insert(entry.run_id.clone(), entry);
        true
    }

    /// Record a run's terminal outcome.
    pub fn finish_run(&self, run_id: &str, outcome: RunOutcome) {
        let mut runs = self.runs.lock().expect("runs lock poisoned");
        if let Some(entry) = runs.get_mut(run_id) {
            entry.lifecycle = RunLifecycle::Finished;
            entry.outcome = Some(outcome);
        }
    }

    /// Update a run's goal once it is known (issue runs fetch it lazily).
    pub fn set_run_goal(&self, run_id: &str, goal: &str) {
        let mut runs = self.runs.lock().expect("runs lock poisoned");
        if let Some(entry) = runs.get_mut(run_id) {
            entry.goal = goal.to_string();
        }
    }

    /// Snapshot of all runs sorted by run id.
    pub fn list_runs(&self) -> Vec<RunEntry> {
        let runs = self.runs.lock().expect("runs lock poisoned");
        let mut entries: Vec<RunEntry> = runs.values().cloned().collect();
        entries.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        entries
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunEntry> {
        let runs = self.runs.lock().expect("runs lock poisoned");
        runs.get(run_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(run_id: &str, lifecycle: RunLifecycle) -> RunEntry {
        RunEntry {
            run_id: run_id.to_string(),
            repository: "acme/widget".to_string(),
            goal: "fix it".to_string(),
            lifecycle,
            outcome: None,
        }
    }

    fn state() -> AppState {
        AppState::new(
            std::env::temp_dir(),
            FixerConfig::default(),
            "token".to_string(),
        )
    }

    #[test]
    fn duplicate_running_ids_are_rejected() {
        let state = state();
        assert!(state.try_insert_run(entry("issue-1", RunLifecycle::Running)));
        assert!(!state.try_insert_run(entry("issue-1", RunLifecycle::Running)));

        // A finished run may be restarted under the same id.
        state.finish_run("issue-1", RunOutcome::error("stopped", Vec::new()));
        assert!(state.try_insert_run(entry("issue-1", RunLifecycle::Running)));
    }

    #[test]
    fn list_runs_is_sorted_by_id() {
        let state = state();
        state.try_insert_run(entry("run-b", RunLifecycle::Running));
        state.try_insert_run(entry("run-a", RunLifecycle::Running));

        let ids: Vec<String> = state
            .list_runs()
            .into_iter()
            .map(|entry| entry.run_id)
            .collect();
        assert_eq!(ids, vec!["run-a".to_string(), "run-b".to_string()]);
    }

    #[test]
    fn finish_run_attaches_outcome() {
        let state = state();
        state.try_insert_run(entry("issue-9", RunLifecycle::Running));
        state.finish_run("issue-9", RunOutcome::error("boom", Vec::new()));

        let entry = state.get_run("issue-9").expect("entry");
        assert_eq!(entry.lifecycle, RunLifecycle::Finished);
        assert!(entry.outcome.is_some());
    }
}
