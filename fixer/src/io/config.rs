//! Fixer configuration stored as TOML (default path `.fixer/config.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Fixer configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable
/// and automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixerConfig {
    /// Hard bound on executed plan steps per run.
    pub max_iterations: u32,

    /// Bound on model turns (tool calls plus the finish) inside one step.
    pub max_step_turns: u32,

    /// Per-request timeout for model and GitHub calls, in seconds.
    pub request_timeout_secs: u64,

    /// Truncate captured model-command output beyond this many bytes.
    pub model_output_limit_bytes: usize,

    /// Branch new work forks from and pull requests target.
    pub base_branch: String,

    pub model: ModelConfig,
}

/// Which model backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    OpenAi,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: ModelBackend,

    /// API base for the `openai` backend.
    pub endpoint: String,

    /// Model identifier for the `openai` backend.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Program and fixed arguments for the `command` backend.
    pub command: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::OpenAi,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            command: Vec::new(),
        }
    }
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_step_turns: 12,
            request_timeout_secs: 120,
            model_output_limit_bytes: 100_000,
            base_branch: "main".to_string(),
            model: ModelConfig::default(),
        }
    }
}

impl FixerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_step_turns == 0 {
            return Err(anyhow!("max_step_turns must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.model_output_limit_bytes == 0 {
            return Err(anyhow!("model_output_limit_bytes must be > 0"));
        }
        if self.base_branch.trim().is_empty() {
            return Err(anyhow!("base_branch must not be empty"));
        }
        if self.model.backend == ModelBackend::Command
            && (self.model.command.is_empty() || self.model.command[0].trim().is_empty())
        {
            return Err(anyhow!(
                "model.command must be a non-empty array for the command backend"
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixerConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixerConfig> {
    if !path.exists() {
        let cfg = FixerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FixerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = FixerConfig {
            max_iterations: 3,
            ..FixerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn command_backend_requires_a_command() {
        let cfg = FixerConfig {
            model: ModelConfig {
                backend: ModelBackend::Command,
                command: Vec::new(),
                ..ModelConfig::default()
            },
            ..FixerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let cfg = FixerConfig {
            max_iterations: 0,
            ..FixerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
