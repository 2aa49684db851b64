//! Replanner: decides between finishing the run and revising the plan.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{ExecutionRecord, RunContext};
use crate::model::{ChatMessage, LanguageModel};
use crate::prompts::PromptEngine;

const ACT_SCHEMA: &str = include_str!("schemas/act.schema.json");

static ACT_SCHEMA_VALUE: LazyLock<Value> =
    LazyLock::new(|| serde_json::from_str(ACT_SCHEMA).expect("act schema should be valid JSON"));

/// Replanner decision. The two variants are exhaustive: there is no third
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replan {
    /// Declare the run complete with a final response.
    Respond(String),
    /// Replace the remaining steps (may shrink, grow or reorder).
    Revise(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ActReply {
    Respond { response: String },
    Plan { steps: Vec<String> },
}

/// Replanner wrapper owning the prompt engine and output schema.
pub struct Replanner {
    prompts: PromptEngine,
}

impl Default for Replanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Replanner {
    pub fn new() -> Self {
        Self {
            prompts: PromptEngine::new(),
        }
    }

    /// Ask the model to either finish or emit the revised remaining plan.
    ///
    /// Errors cover transport failures and output that does not match the
    /// action schema; the control loop recovers from both by synthesizing
    /// an outcome from history.
    pub fn replan<M: LanguageModel>(
        &self,
        model: &M,
        ctx: &RunContext,
        history: &[ExecutionRecord],
    ) -> Result<Replan> {
        let prompt = self.prompts.render_replanner(ctx, history)?;
        let value = model
            .complete_structured(&[ChatMessage::user(prompt)], &ACT_SCHEMA_VALUE)
            .context("replanner completion")?;
        let reply: ActReply = serde_json::from_value(value).context("parse replanner action")?;

        Ok(match reply {
            ActReply::Respond { response } => {
                debug!("replanner declared completion");
                Replan::Respond(response)
            }
            ActReply::Plan { steps } => {
                debug!(steps = steps.len(), "replanner revised the plan");
                Replan::Revise(steps)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, ScriptedReply, test_context};
    use serde_json::json;

    fn history() -> Vec<ExecutionRecord> {
        vec![ExecutionRecord {
            step: "inspect".to_string(),
            result: "found the bug".to_string(),
        }]
    }

    #[test]
    fn respond_action_finishes_the_run() {
        let model = ScriptedModel::new(vec![ScriptedReply::Json(
            json!({"action": "respond", "response": "all done"}),
        )]);

        let replan = Replanner::new()
            .replan(&model, &test_context(), &history())
            .expect("replan");
        assert_eq!(replan, Replan::Respond("all done".to_string()));
    }

    #[test]
    fn plan_action_revises_remaining_steps() {
        let model = ScriptedModel::new(vec![ScriptedReply::Json(
            json!({"action": "plan", "steps": ["update the file", "open a pull request"]}),
        )]);

        let replan = Replanner::new()
            .replan(&model, &test_context(), &history())
            .expect("replan");
        assert_eq!(
            replan,
            Replan::Revise(vec![
                "update the file".to_string(),
                "open a pull request".to_string()
            ])
        );
    }

    #[test]
    fn respond_without_text_is_malformed() {
        // Passes the schema's `required` list but not the tagged-union
        // parse; callers treat this the same as any malformed output.
        let model = ScriptedModel::new(vec![ScriptedReply::Json(json!({"action": "respond"}))]);

        let err = Replanner::new()
            .replan(&model, &test_context(), &history())
            .unwrap_err();
        assert!(format!("{err:#}").contains("parse replanner action"));
    }

    #[test]
    fn unknown_action_is_malformed() {
        let model = ScriptedModel::new(vec![ScriptedReply::Json(json!({"action": "punt"}))]);

        let err = Replanner::new()
            .replan(&model, &test_context(), &history())
            .unwrap_err();
        assert!(format!("{err:#}").contains("replanner completion"));
    }
}
