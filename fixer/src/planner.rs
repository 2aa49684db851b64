//! Planner: decomposes the goal into an ordered step list.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::types::RunContext;
use crate::model::{ChatMessage, LanguageModel};
use crate::prompts::PromptEngine;
use crate::tools::ToolSpec;

const PLAN_SCHEMA: &str = include_str!("schemas/plan.schema.json");

static PLAN_SCHEMA_VALUE: LazyLock<Value> =
    LazyLock::new(|| serde_json::from_str(PLAN_SCHEMA).expect("plan schema should be valid JSON"));

#[derive(Debug, Deserialize)]
struct PlanReply {
    steps: Vec<String>,
}

/// Planner wrapper owning the prompt engine and output schema.
pub struct Planner {
    prompts: PromptEngine,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self {
            prompts: PromptEngine::new(),
        }
    }

    /// Produce the ordered plan for the run's goal.
    ///
    /// An empty or malformed plan is an error: planning failures are fatal
    /// for the run and are not retried at this level.
    pub fn plan<M: LanguageModel>(
        &self,
        model: &M,
        ctx: &RunContext,
        tools: &[ToolSpec],
    ) -> Result<Vec<String>> {
        let prompt = self.prompts.render_planner(ctx, tools)?;
        let messages = [
            ChatMessage::system(prompt),
            ChatMessage::user(ctx.goal.clone()),
        ];

        let value = model
            .complete_structured(&messages, &PLAN_SCHEMA_VALUE)
            .context("planner completion")?;
        let reply: PlanReply = serde_json::from_value(value).context("parse plan")?;
        if reply.steps.is_empty() {
            bail!("planner returned no steps");
        }

        debug!(steps = reply.steps.len(), "plan created");
        Ok(reply.steps)
    }
}
