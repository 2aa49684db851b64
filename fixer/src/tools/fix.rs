//! Code-fix tool backed by the language model.
//!
//! Wraps a structured completion that takes buggy source and returns the
//! corrected code, so the step executor can treat code generation like any
//! other tool call.

use std::sync::Arc;
use std::sync::LazyLock;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{Tool, ToolSpec};
use crate::core::types::ToolOutcome;
use crate::model::{ChatMessage, LanguageModel};

const FIXED_CODE_SCHEMA: &str = include_str!("../schemas/fixed_code.schema.json");

static FIXED_CODE_SCHEMA_VALUE: LazyLock<Value> = LazyLock::new(|| {
    serde_json::from_str(FIXED_CODE_SCHEMA).expect("fixed_code schema should be valid JSON")
});

#[derive(Debug, Deserialize)]
struct FixCodeArgs {
    code: String,
    instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FixedCode {
    fixed_code: String,
}

/// Fixes source code by delegating to the model with a constrained output
/// schema.
pub struct FixCodeTool<M> {
    model: Arc<M>,
}

impl<M> FixCodeTool<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self { model }
    }
}

/// Declared interface of the code-fix tool.
pub fn spec() -> ToolSpec {
    ToolSpec {
        name: "fix_code".to_string(),
        description: "Fix the issues in the provided source code and return the corrected code"
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "source code containing the bug"},
                "instructions": {"type": "string", "description": "what to fix, if known"}
            },
            "required": ["code"],
            "additionalProperties": false
        }),
    }
}

impl<M: LanguageModel> Tool for FixCodeTool<M> {
    fn spec(&self) -> ToolSpec {
        spec()
    }

    fn invoke(&self, args: &Value) -> ToolOutcome {
        let args: FixCodeArgs = match serde_json::from_value(args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutcome::failure(format!("invalid arguments: {err}")),
        };

        let mut prompt = String::from(
            "Fix the following buggy code. Return the complete corrected file content.\n",
        );
        if let Some(instructions) = args
            .instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            prompt.push_str(&format!("\nWhat to fix:\n{instructions}\n"));
        }
        prompt.push_str(&format!("\nCode:\n{}\n", args.code));

        let reply = self
            .model
            .complete_structured(&[ChatMessage::user(prompt)], &FIXED_CODE_SCHEMA_VALUE);
        match reply {
            Ok(value) => match serde_json::from_value::<FixedCode>(value) {
                Ok(fixed) => {
                    debug!(bytes = fixed.fixed_code.len(), "code fix produced");
                    ToolOutcome::success(fixed.fixed_code)
                }
                Err(err) => ToolOutcome::failure(format!("malformed code fix: {err}")),
            },
            Err(err) => ToolOutcome::failure(format!("code fix failed: {err:#}")),
        }
    }
}
