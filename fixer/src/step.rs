//! Step executor: drives one plan step through a bounded tool loop.
//!
//! Each turn the model either calls one tool or finishes the step with a
//! result. Tool failures are fed back as observations and never abort the
//! step; only the turn cap does, and even then the step still produces a
//! record whose result text marks it incomplete.

use std::sync::LazyLock;

use anyhow::Context as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::{ExecutionRecord, RunContext};
use crate::events::RunEvent;
use crate::model::{ChatMessage, LanguageModel};
use crate::prompts::PromptEngine;
use crate::tools::ToolRegistry;

const DECISION_SCHEMA: &str = include_str!("schemas/decision.schema.json");

static DECISION_SCHEMA_VALUE: LazyLock<Value> = LazyLock::new(|| {
    serde_json::from_str(DECISION_SCHEMA).expect("decision schema should be valid JSON")
});

/// Consecutive invalid model replies tolerated before the step aborts.
const MAX_BAD_REPLIES: u32 = 3;

/// Configuration for step execution.
#[derive(Debug, Clone)]
pub struct StepConfig {
    /// Bound on model turns (tool calls plus the finish) per step.
    pub max_turns: u32,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self { max_turns: 12 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum StepDecision {
    Tool {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    Finish {
        result: String,
    },
}

/// Step executor owning the prompt engine, decision schema and turn cap.
pub struct StepRunner {
    prompts: PromptEngine,
    config: StepConfig,
}

impl StepRunner {
    pub fn new(config: StepConfig) -> Self {
        Self {
            prompts: PromptEngine::new(),
            config,
        }
    }

    /// Execute one plan step.
    ///
    /// Always produces exactly one record; never raises for tool failures
    /// or malformed model replies.
    pub fn execute<M: LanguageModel>(
        &self,
        model: &M,
        registry: &ToolRegistry,
        ctx: &RunContext,
        iter: u32,
        step: &str,
        on_event: &mut dyn FnMut(&RunEvent),
    ) -> ExecutionRecord {
        let system = match self.prompts.render_step(ctx, step, &registry.specs()) {
            Ok(prompt) => prompt,
            Err(err) => {
                // Rendering failure would repeat every turn; report it once.
                return finish_record(step, format!("step setup failed: {err:#}"), &[]);
            }
        };

        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(step)];
        let mut tool_notes: Vec<String> = Vec::new();
        let mut bad_replies = 0u32;

        for turn in 1..=self.config.max_turns {
            let decision = model
                .complete_structured(&messages, &DECISION_SCHEMA_VALUE)
                .and_then(|value| {
                    serde_json::from_value::<StepDecision>(value).context("parse step decision")
                });

            match decision {
                Ok(StepDecision::Finish { result }) => {
                    debug!(turn, "step finished");
                    return finish_record(step, result, &tool_notes);
                }
                Ok(StepDecision::Tool { tool, arguments }) => {
                    bad_replies = 0;
                    let outcome = registry.dispatch(&tool, &arguments);
                    on_event(&RunEvent::ToolInvoked {
                        run_id: ctx.run_id.clone(),
                        iter,
                        tool: tool.clone(),
                        ok: outcome.ok,
                    });

                    let observation = if outcome.ok {
                        format!("{tool}: {}", outcome.message)
                    } else {
                        format!("{tool}: error: {}", outcome.message)
                    };
                    debug!(turn, tool = %tool, ok = outcome.ok, "tool observed");
                    tool_notes.push(observation.clone());

                    messages.push(ChatMessage::assistant(
                        serde_json::json!({"action": "tool", "tool": tool, "arguments": arguments})
                            .to_string(),
                    ));
                    messages.push(ChatMessage::user(format!("Observation: {observation}")));
                }
                Err(err) => {
                    bad_replies += 1;
                    warn!(turn, bad_replies, "invalid step decision");
                    if bad_replies >= MAX_BAD_REPLIES {
                        return finish_record(
                            step,
                            format!("step aborted: no valid decision from the model: {err:#}"),
                            &tool_notes,
                        );
                    }
                    messages.push(ChatMessage::user(format!(
                        "Your previous reply was invalid ({err:#}). Reply with a single \
                         JSON object matching the decision schema."
                    )));
                }
            }
        }

        warn!(max_turns = self.config.max_turns, "step turn cap reached");
        finish_record(
            step,
            format!(
                "incomplete: stopped after {} turns without a final answer",
                self.config.max_turns
            ),
            &tool_notes,
        )
    }
}

/// Fold notable tool outcomes into the record's free-text result.
fn finish_record(step: &str, result: String, tool_notes: &[String]) -> ExecutionRecord {
    let result = if tool_notes.is_empty() {
        result
    } else {
        let digest: Vec<String> = tool_notes.iter().map(|note| format!("- {note}")).collect();
        format!("{result}\n\nTool results:\n{}", digest.join("\n"))
    };
    ExecutionRecord {
        step: step.to_string(),
        result,
    }
}
