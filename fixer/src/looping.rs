//! Control loop: plan → execute → replan until done or the budget runs out.
//!
//! State machine: `Planning → Executing → Replanning → (Executing | Done)`.
//! Exactly one step executes per `Executing` entry and is removed from the
//! remaining plan whether or not its tools succeeded. A hard iteration
//! budget bounds `Executing` entries; exhausting it forces a `partial`
//! outcome rather than a crash. The loop never returns an error: every
//! failure mode is folded into the structured [`RunOutcome`].

use tracing::{debug, info, warn};

use crate::core::fallback::{scan_history, synthesize_outcome};
use crate::core::state::{LoopState, RunPhase};
use crate::core::types::{ExecutionRecord, RunContext, RunOutcome, RunStatus};
use crate::events::RunEvent;
use crate::io::config::FixerConfig;
use crate::io::run_log::RunLog;
use crate::model::LanguageModel;
use crate::planner::Planner;
use crate::replanner::{Replan, Replanner};
use crate::step::{StepConfig, StepRunner};
use crate::tools::ToolRegistry;

/// Configuration for one control-loop run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Hard bound on executed steps across the whole run.
    pub max_iterations: u32,
    pub step: StepConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            step: StepConfig::default(),
        }
    }
}

impl LoopConfig {
    /// Derive loop settings from the user-facing config.
    pub fn from_config(cfg: &FixerConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            step: StepConfig {
                max_turns: cfg.max_step_turns,
            },
        }
    }
}

/// Run the full control loop for one goal.
///
/// Always terminates with a structured outcome; no failure mode escapes
/// as an error or panic. Emits one [`RunEvent`] per state transition
/// through `on_event`, ending with `RunCompleted`. Run-log write failures
/// are logged and do not abort the run.
pub fn run_fix<M, F>(
    ctx: &RunContext,
    config: &LoopConfig,
    model: &M,
    registry: &ToolRegistry,
    run_log: Option<&RunLog>,
    mut on_event: F,
) -> RunOutcome
where
    M: LanguageModel,
    F: FnMut(&RunEvent),
{
    let outcome = drive(ctx, config, model, registry, run_log, &mut on_event);

    if let Some(log) = run_log
        && let Err(err) = log.write_outcome(&outcome)
    {
        warn!(err = %err, "failed to write outcome");
    }
    on_event(&RunEvent::RunCompleted {
        run_id: ctx.run_id.clone(),
        outcome: outcome.clone(),
    });
    info!(run_id = %ctx.run_id, status = ?outcome.status, "run completed");
    outcome
}

fn drive<M: LanguageModel>(
    ctx: &RunContext,
    config: &LoopConfig,
    model: &M,
    registry: &ToolRegistry,
    run_log: Option<&RunLog>,
    on_event: &mut dyn FnMut(&RunEvent),
) -> RunOutcome {
    info!(run_id = %ctx.run_id, repository = %ctx.repository, "run started");
    on_event(&RunEvent::RunStarted {
        run_id: ctx.run_id.clone(),
        goal: ctx.goal.clone(),
    });

    let planner = Planner::new();
    let replanner = Replanner::new();
    let step_runner = StepRunner::new(config.step.clone());

    let mut state = LoopState::new(&ctx.goal);
    write_state(run_log, &state);

    let steps = match planner.plan(model, ctx, &registry.specs()) {
        Ok(steps) => steps,
        Err(err) => {
            warn!(err = %err, "planning failed");
            return RunOutcome::error(
                format!("Planning failed for run {}", ctx.run_id),
                vec![format!("{err:#}")],
            );
        }
    };
    state.phase = RunPhase::Executing;
    state.replace_plan(steps.clone());
    on_event(&RunEvent::PlanCreated {
        run_id: ctx.run_id.clone(),
        steps,
    });
    write_state(run_log, &state);

    let mut iter = 0u32;
    loop {
        let Some(step) = state.take_next_step() else {
            // Only reachable when replanning emptied the plan; treated as
            // completion without an explicit response.
            state.phase = RunPhase::Done;
            write_state(run_log, &state);
            return synthesize_outcome(&ctx.goal, &state.history);
        };

        iter += 1;
        debug!(iter, "executing step");
        on_event(&RunEvent::StepStarted {
            run_id: ctx.run_id.clone(),
            iter,
            step: step.clone(),
        });

        let record = step_runner.execute(model, registry, ctx, iter, &step, on_event);
        state.record(record.clone());
        on_event(&RunEvent::StepCompleted {
            run_id: ctx.run_id.clone(),
            iter,
            record: record.clone(),
        });
        if let Some(log) = run_log
            && let Err(err) = log.write_record(iter, &record)
        {
            warn!(err = %err, iter, "failed to write iteration record");
        }
        state.phase = RunPhase::Replanning;
        write_state(run_log, &state);

        match replanner.replan(model, ctx, &state.history) {
            Ok(Replan::Respond(response)) => {
                state.finish(response.clone());
                write_state(run_log, &state);
                return respond_outcome(&state, response);
            }
            Ok(Replan::Revise(steps)) => {
                state.replace_plan(steps.clone());
                on_event(&RunEvent::PlanRevised {
                    run_id: ctx.run_id.clone(),
                    iter,
                    remaining: steps,
                });
                if state.remaining_steps.is_empty() {
                    debug!("replanner left no remaining work");
                    state.phase = RunPhase::Done;
                    write_state(run_log, &state);
                    return synthesize_outcome(&ctx.goal, &state.history);
                }
                state.phase = RunPhase::Executing;
                write_state(run_log, &state);
            }
            Err(err) => {
                // Malformed output and transport failures degrade the same
                // way: the run still ends with a structured outcome built
                // from what history shows.
                warn!(err = %err, "replanning failed, synthesizing outcome from history");
                state.phase = RunPhase::Done;
                write_state(run_log, &state);
                return synthesize_outcome(&ctx.goal, &state.history);
            }
        }

        if iter >= config.max_iterations {
            warn!(
                max_iterations = config.max_iterations,
                remaining = state.remaining_steps.len(),
                "iteration budget exhausted"
            );
            state.phase = RunPhase::Done;
            write_state(run_log, &state);
            let mut outcome = synthesize_outcome(&ctx.goal, &state.history);
            outcome.status = RunStatus::Partial;
            outcome.summary = format!(
                "Stopped after {iter} steps with {} steps remaining",
                state.remaining_steps.len()
            );
            return outcome;
        }
    }
}

/// Outcome for a run the replanner explicitly finished.
///
/// A run only counts as successful once history shows a pull request; a
/// final response without one reports `partial`.
fn respond_outcome(state: &LoopState, response: String) -> RunOutcome {
    let mut records = state.history.clone();
    records.push(ExecutionRecord {
        step: "final response".to_string(),
        result: response.clone(),
    });
    let signals = scan_history(&records);

    let status = if signals.has_pull_request {
        RunStatus::Success
    } else {
        RunStatus::Partial
    };
    let summary = response
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    RunOutcome {
        summary,
        status,
        solution: Some(response),
        files_modified: (!signals.files_modified.is_empty()).then_some(signals.files_modified),
        pull_request_url: signals.pull_request_url,
        branch_name: signals.branch_name,
        errors: (!signals.errors.is_empty()).then_some(signals.errors),
    }
}

fn write_state(run_log: Option<&RunLog>, state: &LoopState) {
    if let Some(log) = run_log
        && let Err(err) = log.write_state(state)
    {
        warn!(err = %err, "failed to write run state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedModel, finish_reply, plan_reply, respond_reply, test_context,
    };

    #[test]
    fn planning_failure_reports_error_without_executing_steps() {
        let model = ScriptedModel::new(vec![plan_reply(&[])]);
        let mut events = Vec::new();

        let outcome = run_fix(
            &test_context(),
            &LoopConfig::default(),
            &model,
            &ToolRegistry::new(),
            None,
            |event| events.push(event.clone()),
        );

        assert_eq!(outcome.status, RunStatus::Error);
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, RunEvent::StepStarted { .. }))
        );
        assert!(matches!(
            events.last().expect("terminal event"),
            RunEvent::RunCompleted { .. }
        ));
    }

    #[test]
    fn respond_with_pull_request_is_success() {
        let model = ScriptedModel::new(vec![
            plan_reply(&["open a pull request"]),
            finish_reply("Pull request created: https://github.com/acme/widget/pull/3"),
            respond_reply("Fixed; see https://github.com/acme/widget/pull/3"),
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
            Some("https://github.com/acme/widget/pull/3")
        );
    }

    #[test]
    fn respond_without_pull_request_is_partial() {
        let model = ScriptedModel::new(vec![
            plan_reply(&["inspect the repository"]),
            finish_reply("had a look around"),
            respond_reply("Nothing to change"),
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
        assert!(outcome.pull_request_url.is_none());
    }
}
