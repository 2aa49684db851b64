//! External-command model backend.
//!
//! Spawns a configurable CLI per completion, feeds the rendered
//! conversation on stdin and reads the reply from stdout, with a hard
//! timeout and bounded captured output. Structured completions append the
//! schema as an extra prompt section and validate the captured JSON.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{ChatMessage, LanguageModel, extract_json_object, render_transcript, validate_schema};
use crate::io::process::run_command_with_timeout;

/// Settings for [`CommandModel`].
#[derive(Debug, Clone)]
pub struct CommandSettings {
    /// Program and fixed arguments, e.g. `["my-llm", "--quiet"]`.
    pub command: Vec<String>,
    /// Maximum time to wait for one completion.
    pub timeout: Duration,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Model backend that shells out to an external CLI.
#[derive(Debug)]
pub struct CommandModel {
    settings: CommandSettings,
}

impl CommandModel {
    pub fn new(settings: CommandSettings) -> Result<Self> {
        if settings.command.is_empty() || settings.command[0].trim().is_empty() {
            return Err(anyhow!("model command must be a non-empty array"));
        }
        Ok(Self { settings })
    }

    #[instrument(skip_all, fields(program = %self.settings.command[0], timeout_secs = self.settings.timeout.as_secs()))]
    fn invoke(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.settings.command[0]);
        cmd.args(&self.settings.command[1..]);

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.settings.timeout,
            self.settings.output_limit_bytes,
        )
        .context("run model command")?;

        if output.timed_out {
            warn!("model command timed out");
            return Err(anyhow!(
                "model command timed out after {:?}",
                self.settings.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        debug!(bytes = output.stdout.len(), "model command completed");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl LanguageModel for CommandModel {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.invoke(&render_transcript(messages))
    }

    fn complete_structured(&self, messages: &[ChatMessage], schema: &Value) -> Result<Value> {
        let prompt = format!(
            "{}## output schema\n\nReply with a single JSON object that conforms to this \
             JSON Schema. No prose, no code fences.\n{schema}\n",
            render_transcript(messages)
        );
        let reply = self.invoke(&prompt)?;
        let value = extract_json_object(&reply)?;
        validate_schema(&value, schema)?;
        Ok(value)
    }
}
