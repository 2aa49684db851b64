//! Language-model abstraction shared by the planner, step executor and
//! replanner.
//!
//! The [`LanguageModel`] trait decouples orchestration from the actual
//! backend (hosted chat API or an external CLI). Tests use scripted models
//! that return predetermined replies without network access.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod command;
pub mod openai;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a model conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Abstraction over language-model backends.
pub trait LanguageModel {
    /// Free-form completion for the given conversation.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Completion constrained by a JSON Schema.
    ///
    /// Implementations must return a value that already validates against
    /// `schema`; callers rely on that and do not revalidate. Schema
    /// violations and transport failures surface as errors, which callers
    /// recover from according to their own policy.
    fn complete_structured(&self, messages: &[ChatMessage], schema: &Value) -> Result<Value>;
}

/// Model backend selected by configuration.
///
/// Lets callers hold one concrete type while the config decides between
/// the hosted chat API and an external CLI.
pub enum AnyModel {
    OpenAi(openai::OpenAiModel),
    Command(command::CommandModel),
}

impl AnyModel {
    /// Build the backend the config selects.
    pub fn from_config(cfg: &crate::io::config::FixerConfig) -> Result<Self> {
        use crate::io::config::ModelBackend;
        use std::time::Duration;

        let timeout = Duration::from_secs(cfg.request_timeout_secs);
        match cfg.model.backend {
            ModelBackend::OpenAi => {
                let api_key = std::env::var(&cfg.model.api_key_env).with_context(|| {
                    format!("read model api key from ${}", cfg.model.api_key_env)
                })?;
                Ok(Self::OpenAi(openai::OpenAiModel::new(
                    openai::OpenAiSettings {
                        endpoint: cfg.model.endpoint.clone(),
                        model: cfg.model.model.clone(),
                        api_key,
                        timeout,
                    },
                )?))
            }
            ModelBackend::Command => Ok(Self::Command(command::CommandModel::new(
                command::CommandSettings {
                    command: cfg.model.command.clone(),
                    timeout,
                    output_limit_bytes: cfg.model_output_limit_bytes,
                },
            )?)),
        }
    }
}

impl LanguageModel for AnyModel {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        match self {
            Self::OpenAi(model) => model.complete(messages),
            Self::Command(model) => model.complete(messages),
        }
    }

    fn complete_structured(&self, messages: &[ChatMessage], schema: &Value) -> Result<Value> {
        match self {
            Self::OpenAi(model) => model.complete_structured(messages, schema),
            Self::Command(model) => model.complete_structured(messages, schema),
        }
    }
}

/// Validate a JSON instance against a schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Extract the first JSON object from free-form model text.
///
/// Models often wrap the object in prose or code fences; take the
/// outermost `{...}` span and parse that.
pub(crate) fn extract_json_object(text: &str) -> Result<Value> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        bail!("no JSON object in model reply");
    };
    if end < start {
        bail!("no JSON object in model reply");
    }
    serde_json::from_str(&text[start..=end]).context("parse model reply as JSON")
}

/// Render a conversation into a single prompt string for backends that
/// take plain text instead of structured messages.
pub(crate) fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut buf = String::new();
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        buf.push_str(&format!("## {role}\n\n{}\n\n", message.content.trim()));
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_json_object_ignores_surrounding_prose() {
        let text = "Sure, here you go:\n```json\n{\"steps\": [\"a\"]}\n```\nDone.";
        let value = extract_json_object(text).expect("extract");
        assert_eq!(value, json!({"steps": ["a"]}));
    }

    #[test]
    fn extract_json_object_rejects_plain_text() {
        let err = extract_json_object("no json here").unwrap_err();
        assert!(err.to_string().contains("no JSON object"));
    }

    #[test]
    fn validate_schema_reports_violations() {
        let schema = json!({
            "type": "object",
            "properties": {"steps": {"type": "array"}},
            "required": ["steps"]
        });

        validate_schema(&json!({"steps": []}), &schema).expect("valid");
        let err = validate_schema(&json!({"other": 1}), &schema).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn transcript_renders_roles_in_order() {
        let messages = [
            ChatMessage::system("be helpful"),
            ChatMessage::user("hi"),
        ];

        let rendered = render_transcript(&messages);
        let system_pos = rendered.find("## system").expect("system section");
        let user_pos = rendered.find("## user").expect("user section");
        assert!(system_pos < user_pos);
        assert!(rendered.contains("be helpful"));
    }
}
