//! OpenAI-compatible chat-completions backend.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{ChatMessage, LanguageModel, extract_json_object, validate_schema};

/// Settings for [`OpenAiModel`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// API base, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    /// Model identifier sent in the request body.
    pub model: String,
    /// Bearer token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Chat backend speaking the `/chat/completions` wire format.
#[derive(Debug)]
pub struct OpenAiModel {
    client: Client,
    settings: OpenAiSettings,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiModel {
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(anyhow!("model api key must not be empty"));
        }
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client, settings })
    }

    #[instrument(skip_all, fields(model = %self.settings.model))]
    fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.settings.model,
            messages,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .json(&request)
            .send()
            .context("send chat request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            warn!(%status, "chat request failed");
            return Err(anyhow!("chat request failed: {status} - {body}"));
        }

        let parsed: ChatResponse = response.json().context("parse chat response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat response had no content"))?;
        debug!(bytes = content.len(), "chat reply received");
        Ok(content)
    }
}

impl LanguageModel for OpenAiModel {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.chat(messages)
    }

    fn complete_structured(&self, messages: &[ChatMessage], schema: &Value) -> Result<Value> {
        let mut messages = messages.to_vec();
        messages.push(ChatMessage::system(format!(
            "Reply with a single JSON object that conforms to this JSON Schema. \
             No prose, no code fences.\n{schema}"
        )));
        let reply = self.chat(&messages)?;
        let value = extract_json_object(&reply)?;
        validate_schema(&value, schema)?;
        Ok(value)
    }
}
