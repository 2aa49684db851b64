//! Prompt templates for the planner, replanner and step executor.
//!
//! Templates are compiled once per engine and rendered with explicit
//! context structs, so a rendering failure is a programming error caught
//! at construction or test time rather than mid-run.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{ExecutionRecord, RunContext};
use crate::tools::ToolSpec;

const PLANNER_TEMPLATE: &str = include_str!("planner.md");
const REPLANNER_TEMPLATE: &str = include_str!("replanner.md");
const STEP_TEMPLATE: &str = include_str!("step.md");

/// Tool fields exposed to templates. The arguments schema is
/// pre-serialized so prompts always contain valid JSON text.
#[derive(Debug, Clone, Serialize)]
struct ToolContext {
    name: String,
    description: String,
    parameters: String,
}

impl ToolContext {
    fn from_spec(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters.to_string(),
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("replanner", REPLANNER_TEMPLATE)
            .expect("replanner template should be valid");
        env.add_template("step", STEP_TEMPLATE)
            .expect("step template should be valid");
        Self { env }
    }

    /// Render the planner prompt for a goal and the available tool names.
    pub fn render_planner(&self, ctx: &RunContext, tools: &[ToolSpec]) -> Result<String> {
        let tools: Vec<ToolContext> = tools.iter().map(ToolContext::from_spec).collect();
        let template = self.env.get_template("planner").context("get template")?;
        template
            .render(context! {
                goal => ctx.goal.trim(),
                repository => ctx.repository,
                base_branch => ctx.base_branch,
                tools => tools,
            })
            .context("render planner template")
    }

    /// Render the replanner prompt with the full execution history.
    pub fn render_replanner(
        &self,
        ctx: &RunContext,
        history: &[ExecutionRecord],
    ) -> Result<String> {
        let template = self.env.get_template("replanner").context("get template")?;
        template
            .render(context! {
                goal => ctx.goal.trim(),
                history => history,
            })
            .context("render replanner template")
    }

    /// Render the step-executor system prompt for one plan step.
    pub fn render_step(&self, ctx: &RunContext, step: &str, tools: &[ToolSpec]) -> Result<String> {
        let tools: Vec<ToolContext> = tools.iter().map(ToolContext::from_spec).collect();
        let template = self.env.get_template("step").context("get template")?;
        template
            .render(context! {
                goal => ctx.goal.trim(),
                step => step.trim(),
                repository => ctx.repository,
                base_branch => ctx.base_branch,
                tools => tools,
            })
            .context("render step template")
    }
}
