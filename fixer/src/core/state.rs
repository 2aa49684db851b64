//! Mutable aggregate state for one control-loop run.

use serde::{Deserialize, Serialize};

use crate::core::types::ExecutionRecord;

/// Phase of the control-loop state machine.
///
/// `Planning` is the sole initial phase, `Done` the sole terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Planning,
    Executing,
    Replanning,
    Done,
}

/// Loop state for one run.
///
/// Owned exclusively by the control loop for the duration of the run.
/// Concurrent runs each get an independent instance; isolation is achieved
/// by not sharing, not by synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    pub goal: String,
    pub phase: RunPhase,
    /// Ordered steps still to execute. The head is always next.
    pub remaining_steps: Vec<String>,
    /// Append-only log of completed steps, oldest first.
    pub history: Vec<ExecutionRecord>,
    pub final_response: Option<String>,
}

impl LoopState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            phase: RunPhase::Planning,
            remaining_steps: Vec::new(),
            history: Vec::new(),
            final_response: None,
        }
    }

    /// Remove and return the head of the remaining plan.
    ///
    /// The step is consumed immediately: it counts as executed whether or
    /// not the tools inside it succeed.
    pub fn take_next_step(&mut self) -> Option<String> {
        if self.remaining_steps.is_empty() {
            return None;
        }
        Some(self.remaining_steps.remove(0))
    }

    /// Append a completed record. Existing records are never rewritten.
    pub fn record(&mut self, record: ExecutionRecord) {
        self.history.push(record);
    }

    /// Replace the remaining plan after replanning. The new plan may
    /// shrink, grow or reorder relative to the previous one.
    pub fn replace_plan(&mut self, steps: Vec<String>) {
        self.remaining_steps = steps;
    }

    pub fn finish(&mut self, response: impl Into<String>) {
        self.final_response = Some(response.into());
        self.phase = RunPhase::Done;
    }

    /// True once a final response is set or no work remains.
    pub fn is_done(&self) -> bool {
        self.final_response.is_some() || self.remaining_steps.is_empty()
    }
}
