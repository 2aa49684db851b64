//! Loop-level tests for full run lifecycle scenarios.
//!
//! These drive `run_fix` end to end with scripted models and tools to
//! verify state-machine behavior: step consumption, history accumulation,
//! replanning, budget enforcement and outcome synthesis.

use std::fs;

use fixer::core::state::LoopState;
use fixer::core::types::{RunStatus, ToolOutcome};
use fixer::events::RunEvent;
use fixer::io::run_log::RunLog;
use fixer::looping::{LoopConfig, run_fix};
use fixer::step::StepConfig;
use fixer::test_support::{
    ScriptedModel, StaticTool, finish_reply, plan_reply, respond_reply, revise_reply,
    test_context, tool_reply,
};
use fixer::tools::ToolRegistry;
use serde_json::json;

fn repository_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(StaticTool::new(
        "create_branch",
        ToolOutcome::success("Branch 'fix/colon' created from 'main'"),
    )));
    registry.register(Box::new(StaticTool::new(
        "update_file_in_branch",
        ToolOutcome::success("File 'missing_colon.py' updated on branch 'fix/colon'"),
    )));
    registry.register(Box::new(StaticTool::new(
        "create_pull_request",
        ToolOutcome::success("Pull request created: https://github.com/acme/widget/pull/17"),
    )));
    registry
}

/// Happy path: inspect → fix on a branch → open a pull request, then the
/// replanner declares completion. One history record per executed step,
/// success with the pull request URL populated.
#[test]
fn happy_path_ends_in_success_with_pull_request() {
    let model = ScriptedModel::new(vec![
        plan_reply(&[
            "inspect missing_colon.py",
            "fix the file on a new branch",
            "open a pull request",
        ]),
        // iteration 1
        finish_reply("inspected the file; a colon is missing on line 4"),
        revise_reply(&["fix the file on a new branch", "open a pull request"]),
        // iteration 2
        tool_reply("create_branch", json!({"branch": "fix/colon"})),
        tool_reply(
            "update_file_in_branch",
            json!({
                "path": "missing_colon.py",
                "content": "def division(a, b):\n    return a / b\n",
                "commit_message": "fix missing colon",
                "branch": "fix/colon"
            }),
        ),
        finish_reply("committed the fix on the branch"),
        revise_reply(&["open a pull request"]),
        // iteration 3
        tool_reply(
            "create_pull_request",
            json!({"title": "fix colon", "body": "fixes #2", "branch": "fix/colon"}),
        ),
        finish_reply("opened the pull request"),
        respond_reply("Fixed the missing colon; see the pull request."),
    ]);
    let registry = repository_registry();

    let mut events = Vec::new();
    let outcome = run_fix(
        &test_context(),
        &LoopConfig::default(),
        &model,
        &registry,
        None,
        |event| events.push(event.clone()),
    );

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(
        outcome.pull_request_url.as_deref(),
        Some("https://github.com/acme/widget/pull/17")
    );
    assert_eq!(outcome.branch_name.as_deref(), Some("fix/colon"));
    assert_eq!(
        outcome.files_modified,
        Some(vec!["missing_colon.py".to_string()])
    );
    assert_eq!(model.remaining(), 0);

    // Exactly one record per executed step, in order.
    let completed: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::StepCompleted { iter, .. } => Some(*iter),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![1, 2, 3]);
    assert!(matches!(
        events.last().expect("terminal event"),
        RunEvent::RunCompleted { .. }
    ));
}

/// Creating a branch that already exists is a recognized non-fatal
/// outcome: the step completes normally and the run does not error.
#[test]
fn branch_conflict_is_non_fatal() {
    let model = ScriptedModel::new(vec![
        plan_reply(&["create the fix branch"]),
        tool_reply("create_branch", json!({"branch": "fix/colon"})),
        finish_reply("the branch was already there, moving on"),
        respond_reply("Branch exists; nothing further to do."),
    ]);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(StaticTool::new(
        "create_branch",
        ToolOutcome::success("Branch 'fix/colon' already exists"),
    )));

    let mut events = Vec::new();
    let outcome = run_fix(
        &test_context(),
        &LoopConfig::default(),
        &model,
        &registry,
        None,
        |event| events.push(event.clone()),
    );

    assert_ne!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.branch_name.as_deref(), Some("fix/colon"));
    assert!(events.iter().any(|event| matches!(
        event,
        RunEvent::ToolInvoked { tool, ok: true, .. } if tool == "create_branch"
    )));
    let step_record = events
        .iter()
        .find_map(|event| match event {
            RunEvent::StepCompleted { record, .. } => Some(record.clone()),
            _ => None,
        })
        .expect("step record");
    assert!(step_record.result.contains("already exists"));
}

/// A 10-step plan against a budget of 3 stops after exactly 3 executed
/// steps and reports `partial`, discarding the unexecuted tail.
#[test]
fn budget_exhaustion_forces_partial() {
    let steps: Vec<String> = (1..=10).map(|i| format!("step {i}")).collect();
    let step_refs: Vec<&str> = steps.iter().map(String::as_str).collect();

    let mut replies = vec![plan_reply(&step_refs)];
    for executed in 1..=3usize {
        replies.push(finish_reply("worked on it"));
        let remaining: Vec<&str> = step_refs[executed..].to_vec();
        replies.push(revise_reply(&remaining));
    }
    let model = ScriptedModel::new(replies);

    let mut events = Vec::new();
    let outcome = run_fix(
        &test_context(),
        &LoopConfig {
            max_iterations: 3,
            step: StepConfig::default(),
        },
        &model,
        &ToolRegistry::new(),
        None,
        |event| events.push(event.clone()),
    );

    assert_eq!(outcome.status, RunStatus::Partial);
    assert!(outcome.summary.contains("7 steps remaining"));
    let executed = events
        .iter()
        .filter(|event| matches!(event, RunEvent::StepStarted { .. }))
        .count();
    assert_eq!(executed, 3);
    assert_eq!(model.remaining(), 0);
}

/// Replanner output that fails schema validation still yields a
/// structured outcome, recovered from history signals.
#[test]
fn malformed_replan_falls_back_to_history_signals() {
    let model = ScriptedModel::new(vec![
        plan_reply(&["open a pull request"]),
        finish_reply("Pull request created: https://github.com/acme/widget/pull/9"),
        // Passes nothing: unknown action value fails validation.
        fixer::test_support::ScriptedReply::Json(json!({"action": "celebrate"})),
    ]);

    let outcome = run_fix(
        &test_context(),
        &LoopConfig::default(),
        &model,
        &ToolRegistry::new(),
        None,
        |_| {},
    );

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(
        outcome.pull_request_url.as_deref(),
        Some("https://github.com/acme/widget/pull/9")
    );
}

/// A replanner transport failure degrades the same way as malformed
/// output: structured outcome from history, no panic, no raw error.
#[test]
fn replanner_transport_failure_still_produces_outcome() {
    let model = ScriptedModel::new(vec![
        plan_reply(&["inspect"]),
        finish_reply("had a look"),
        fixer::test_support::ScriptedReply::Fail("connection reset".to_string()),
    ]);

    let outcome = run_fix(
        &test_context(),
        &LoopConfig::default(),
        &model,
        &ToolRegistry::new(),
        None,
        |_| {},
    );

    assert_eq!(outcome.status, RunStatus::Partial);
}

/// A revised plan with no steps terminates the loop with a synthesized
/// outcome.
#[test]
fn empty_revised_plan_terminates_the_run() {
    let model = ScriptedModel::new(vec![
        plan_reply(&["inspect"]),
        finish_reply("nothing to change"),
        revise_reply(&[]),
    ]);

    let mut events = Vec::new();
    let outcome = run_fix(
        &test_context(),
        &LoopConfig::default(),
        &model,
        &ToolRegistry::new(),
        None,
        |event| events.push(event.clone()),
    );

    assert_eq!(outcome.status, RunStatus::Partial);
    let executed = events
        .iter()
        .filter(|event| matches!(event, RunEvent::StepStarted { .. }))
        .count();
    assert_eq!(executed, 1);
}

/// Run-log artifacts: state snapshot with the full history, one record
/// per iteration, and the terminal outcome.
#[test]
fn run_log_captures_state_records_and_outcome() {
    let temp = tempfile::tempdir().expect("tempdir");
    let run_log = RunLog::create(temp.path(), "issue-2").expect("run log");

    let model = ScriptedModel::new(vec![
        plan_reply(&["inspect", "open a pull request"]),
        finish_reply("inspected"),
        revise_reply(&["open a pull request"]),
        finish_reply("Pull request created: https://github.com/acme/widget/pull/4"),
        respond_reply("Done; pull request is up."),
    ]);

    let outcome = run_fix(
        &test_context(),
        &LoopConfig::default(),
        &model,
        &ToolRegistry::new(),
        Some(&run_log),
        |_| {},
    );
    assert_eq!(outcome.status, RunStatus::Success);

    let state: LoopState = serde_json::from_str(
        &fs::read_to_string(run_log.dir().join("state.json")).expect("read state"),
    )
    .expect("parse state");
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history[0].step, "inspect");
    assert_eq!(state.final_response.as_deref(), Some("Done; pull request is up."));

    assert!(run_log.dir().join("iterations/1/record.json").is_file());
    assert!(run_log.dir().join("iterations/2/record.json").is_file());

    let outcome_json: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(run_log.dir().join("outcome.json")).expect("read outcome"),
    )
    .expect("parse outcome");
    assert_eq!(outcome_json["status"], "success");
}
