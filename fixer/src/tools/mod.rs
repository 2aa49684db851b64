//! Tool registry with schema-validated dispatch.
//!
//! Each tool performs one side-effecting operation. Dispatch is by
//! declared name, with arguments validated against the tool's JSON Schema
//! before invocation — the reasoning loop never pattern-matches free text
//! to pick a tool. Tool failures come back as tagged
//! [`ToolOutcome`](crate::core::types::ToolOutcome)s, never as errors or
//! panics.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::ToolOutcome;
use crate::model::validate_schema;

pub mod fix;
pub mod github;

/// Specs of the six built-in tools, without constructing any of them.
pub fn builtin_specs() -> Vec<ToolSpec> {
    vec![
        github::ListFilesTool::spec(),
        github::ReadFileTool::spec(),
        github::CreateBranchTool::spec(),
        github::UpdateFileTool::spec(),
        github::CreatePullRequestTool::spec(),
        fix::spec(),
    ]
}

/// Declared interface of a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Dispatch name, unique within a registry.
    pub name: String,
    /// One-line description shown to the model.
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// A side-effecting operation exposed to the reasoning loop.
pub trait Tool {
    fn spec(&self) -> ToolSpec;

    /// Invoke with arguments already validated against [`ToolSpec::parameters`].
    ///
    /// Failures are returned as `ok = false` outcomes so the loop can feed
    /// them back to the model as observations.
    fn invoke(&self, args: &Value) -> ToolOutcome;
}

/// Name-keyed collection of tools for one run.
///
/// Keyed by a `BTreeMap` so listings are deterministic.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name, replacing any previous
    /// tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let spec = tool.spec();
        self.tools.insert(spec.name, tool);
    }

    /// Declared specs of all registered tools, in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    /// Registered tool names, in order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate arguments and dispatch to the named tool.
    ///
    /// Unknown names and schema violations come back as failed outcomes so
    /// the model can correct itself on the next turn.
    pub fn dispatch(&self, name: &str, args: &Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "unknown tool requested");
            return ToolOutcome::failure(format!("unknown tool '{name}'"));
        };
        let spec = tool.spec();
        if let Err(err) = validate_schema(args, &spec.parameters) {
            warn!(tool = name, "tool arguments rejected");
            return ToolOutcome::failure(format!("invalid arguments for '{name}': {err:#}"));
        }
        debug!(tool = name, "dispatching tool");
        tool.invoke(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".to_string(),
                description: "echo the message back".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"],
                    "additionalProperties": false
                }),
            }
        }

        fn invoke(&self, args: &Value) -> ToolOutcome {
            ToolOutcome::success(args["message"].as_str().unwrap_or_default())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry
    }

    #[test]
    fn dispatch_runs_registered_tool() {
        let outcome = registry().dispatch("echo", &json!({"message": "hi"}));
        assert!(outcome.ok);
        assert_eq!(outcome.message, "hi");
    }

    #[test]
    fn dispatch_rejects_unknown_tool() {
        let outcome = registry().dispatch("nope", &json!({}));
        assert!(!outcome.ok);
        assert!(outcome.message.contains("unknown tool 'nope'"));
    }

    #[test]
    fn dispatch_rejects_invalid_arguments() {
        let outcome = registry().dispatch("echo", &json!({"message": 7}));
        assert!(!outcome.ok);
        assert!(outcome.message.contains("invalid arguments"));
    }

    #[test]
    fn specs_are_listed_in_name_order() {
        struct Named(&'static str);
        impl Tool for Named {
            fn spec(&self) -> ToolSpec {
                ToolSpec {
                    name: self.0.to_string(),
                    description: String::new(),
                    parameters: json!({"type": "object"}),
                }
            }
            fn invoke(&self, _args: &Value) -> ToolOutcome {
                ToolOutcome::success("")
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Named("zeta")));
        registry.register(Box::new(Named("alpha")));

        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
