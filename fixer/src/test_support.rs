//! Test-only fakes for the model and tool seams.
//!
//! Scripted collaborators return predetermined replies in order, letting
//! loop tests drive every control-flow branch without network access or a
//! real model.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::{RunContext, ToolOutcome};
use crate::model::{ChatMessage, LanguageModel, validate_schema};
use crate::tools::{Tool, ToolSpec};

/// One canned model reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Plain-text reply for `complete`.
    Text(String),
    /// JSON reply for `complete_structured`. Validated against the
    /// caller's schema the way a real backend would, so a nonconforming
    /// value exercises the malformed-output path.
    Json(Value),
    /// Simulated transport failure.
    Fail(String),
}

/// Model returning scripted replies in order.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<ScriptedReply>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
        }
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }

    fn next(&self) -> Result<ScriptedReply> {
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model exhausted"))
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        match self.next()? {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Json(value) => Ok(value.to_string()),
            ScriptedReply::Fail(message) => Err(anyhow!(message)),
        }
    }

    fn complete_structured(&self, _messages: &[ChatMessage], schema: &Value) -> Result<Value> {
        match self.next()? {
            ScriptedReply::Json(value) => {
                validate_schema(&value, schema)?;
                Ok(value)
            }
            ScriptedReply::Text(text) => Err(anyhow!("expected structured reply, got: {text}")),
            ScriptedReply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Tool returning a fixed outcome and recording received arguments.
pub struct StaticTool {
    name: String,
    outcome: ToolOutcome,
    calls: RefCell<Vec<Value>>,
}

impl StaticTool {
    pub fn new(name: &str, outcome: ToolOutcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Arguments received so far, in call order.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.borrow().clone()
    }
}

impl Tool for StaticTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: format!("{} (scripted)", self.name),
            parameters: json!({"type": "object"}),
        }
    }

    fn invoke(&self, args: &Value) -> ToolOutcome {
        self.calls.borrow_mut().push(args.clone());
        self.outcome.clone()
    }
}

/// Deterministic run context for tests.
pub fn test_context() -> RunContext {
    RunContext {
        run_id: "issue-2".to_string(),
        goal: "Fix the syntax error in missing_colon.py".to_string(),
        repository: "acme/widget".to_string(),
        base_branch: "main".to_string(),
    }
}

/// Planner reply with the given steps.
pub fn plan_reply(steps: &[&str]) -> ScriptedReply {
    ScriptedReply::Json(json!({ "steps": steps }))
}

/// Replanner reply declaring completion.
pub fn respond_reply(response: &str) -> ScriptedReply {
    ScriptedReply::Json(json!({"action": "respond", "response": response}))
}

/// Replanner reply replacing the remaining steps.
pub fn revise_reply(steps: &[&str]) -> ScriptedReply {
    ScriptedReply::Json(json!({"action": "plan", "steps": steps}))
}

/// Step decision finishing the step with a result.
pub fn finish_reply(result: &str) -> ScriptedReply {
    ScriptedReply::Json(json!({"action": "finish", "result": result}))
}

/// Step decision calling one tool.
pub fn tool_reply(tool: &str, arguments: Value) -> ScriptedReply {
    ScriptedReply::Json(json!({"action": "tool", "tool": tool, "arguments": arguments}))
}
