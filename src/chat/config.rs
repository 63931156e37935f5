//! Chat model configuration
//!
//! Parses `chat.toml` (or builds programmatically) into a `ChatModelConfig`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::claude::cli::{PermissionMode, QueryOptions, DEFAULT_CLI_PATH};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Temperature assumed by the CLI; other values are ignored.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Output limit assumed by the CLI; other values are ignored.
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Configuration of a `ClaudeCodeChatModel`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatModelConfig {
    /// Claude model identifier
    pub model: String,
    /// System prompt used when the conversation has no system message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Permission mode passed to the CLI
    pub permission_mode: PermissionMode,
    /// Tools the CLI may use
    pub allowed_tools: Vec<String>,
    /// Working directory for the CLI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Keep one CLI process alive across invocations
    pub use_continuous_session: bool,
    /// Accepted but not supported by the CLI
    pub temperature: Option<f64>,
    /// Accepted but not supported by the CLI
    pub max_tokens: Option<u32>,
    /// Program to run instead of `claude` on `PATH`
    pub cli_path: PathBuf,
}

impl Default for ChatModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            permission_mode: PermissionMode::Default,
            allowed_tools: Vec::new(),
            cwd: None,
            use_continuous_session: false,
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            cli_path: PathBuf::from(DEFAULT_CLI_PATH),
        }
    }
}

impl ChatModelConfig {
    /// Parse a chat.toml file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse chat.toml content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse chat.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set the permission mode
    #[must_use]
    pub const fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// Set the allowed tools
    #[must_use]
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Enable or disable continuous sessions
    #[must_use]
    pub const fn with_continuous_session(mut self, enabled: bool) -> Self {
        self.use_continuous_session = enabled;
        self
    }

    /// Set the (inert) temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the (inert) output limit
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Use a different CLI program
    #[must_use]
    pub fn with_cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cli_path = path.into();
        self
    }

    /// CLI options for one invocation.
    ///
    /// `include_system_prompt` is false when the conversation brings its own
    /// system message.
    #[must_use]
    pub fn query_options(&self, include_system_prompt: bool) -> QueryOptions {
        QueryOptions {
            cli_path: Some(self.cli_path.clone()),
            model: Some(self.model.clone()),
            system_prompt: if include_system_prompt {
                self.system_prompt.clone()
            } else {
                None
            },
            permission_mode: self.permission_mode,
            allowed_tools: self.allowed_tools.clone(),
            max_turns: Some(1),
            cwd: self.cwd.clone(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            bail!("Model name cannot be empty");
        }
        for tool in &self.allowed_tools {
            validate_tool(tool)?;
        }
        Ok(())
    }
}

/// Validate that a tool string matches `--allowedTools` syntax:
/// either `ToolName` (bare) or `ToolName(specifier)`.
fn validate_tool(tool: &str) -> Result<()> {
    if tool.is_empty() {
        bail!("Invalid allowed tool '': tool name cannot be empty");
    }

    let name_end = tool
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(tool.len());
    let name = &tool[..name_end];

    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        bail!("Invalid allowed tool '{tool}': tool name must start with a letter");
    }

    let rest = &tool[name_end..];
    if rest.is_empty() {
        return Ok(());
    }

    if !rest.starts_with('(') || !rest.ends_with(')') || rest.len() == 2 {
        bail!("Invalid allowed tool '{tool}': expected format 'ToolName' or 'ToolName(specifier)'");
    }

    Ok(())
}

/// Notices for inert parameters set to a non-default value, one per parameter.
#[must_use]
pub fn inert_parameter_warnings(config: &ChatModelConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(temperature) = config.temperature {
        if (temperature - DEFAULT_TEMPERATURE).abs() > f64::EPSILON {
            warnings.push(format!(
                "Temperature {temperature} is not supported by Claude Code CLI; the default \
                 temperature will be used. Use the Messages API for temperature control."
            ));
        }
    }

    if let Some(max_tokens) = config.max_tokens {
        if max_tokens != DEFAULT_MAX_TOKENS {
            warnings.push(format!(
                "max_tokens {max_tokens} is not supported by Claude Code CLI; the default \
                 output limit will be used. Use the Messages API for token limit control."
            ));
        }
    }

    warnings
}
