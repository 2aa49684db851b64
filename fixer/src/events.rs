//! Control-loop transition events.
//!
//! One event is emitted per state-machine transition through the
//! `on_event` callback passed to [`crate::looping::run_fix`]. Consumers
//! (CLI progress logging, the UI server's SSE stream) receive them in
//! order within a run; events from different runs are unrelated.

use serde::Serialize;

use crate::core::types::{ExecutionRecord, RunOutcome};

/// Event for one control-loop transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        goal: String,
    },
    PlanCreated {
        run_id: String,
        steps: Vec<String>,
    },
    StepStarted {
        run_id: String,
        iter: u32,
        step: String,
    },
    /// A tool was dispatched inside the current step. `ok` mirrors the
    /// tool's tagged outcome; failed tools do not abort the step.
    ToolInvoked {
        run_id: String,
        iter: u32,
        tool: String,
        ok: bool,
    },
    StepCompleted {
        run_id: String,
        iter: u32,
        record: ExecutionRecord,
    },
    PlanRevised {
        run_id: String,
        iter: u32,
        remaining: Vec<String>,
    },
    /// Terminal event; carries the structured outcome.
    RunCompleted {
        run_id: String,
        outcome: RunOutcome,
    },
}

impl RunEvent {
    /// Run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::PlanCreated { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::ToolInvoked { run_id, .. }
            | RunEvent::StepCompleted { run_id, .. }
            | RunEvent::PlanRevised { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. } => run_id,
        }
    }
}
