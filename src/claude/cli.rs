//! Claude Code CLI command builder
//!
//! Constructs `std::process::Command` for invoking Claude Code, either
//! once per prompt (`-p <prompt>`) or as a long-lived session that reads
//! stream-json user messages from stdin.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

/// Default program name looked up on `PATH`.
pub const DEFAULT_CLI_PATH: &str = "claude";

/// Claude Code permission mode (maps to `--permission-mode`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask before every tool use
    #[default]
    Default,
    /// Accept file edits without asking
    AcceptEdits,
    /// Plan only, no edits
    Plan,
    /// Skip all permission checks
    BypassPermissions,
}

impl PermissionMode {
    /// The flag value understood by the CLI
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for one CLI invocation.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Program to run; `claude` when `None`.
    pub cli_path: Option<PathBuf>,
    /// Model identifier (maps to `--model`).
    pub model: Option<String>,
    /// System prompt (maps to `--system-prompt`).
    pub system_prompt: Option<String>,
    /// Permission mode (maps to `--permission-mode`).
    pub permission_mode: PermissionMode,
    /// Allowed tool names (maps to `--allowedTools`).
    pub allowed_tools: Vec<String>,
    /// Maximum agentic turns (maps to `--max-turns`).
    pub max_turns: Option<u32>,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
}

impl QueryOptions {
    /// The program that will be spawned
    #[must_use]
    pub fn program(&self) -> PathBuf {
        self.cli_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLI_PATH))
    }
}

/// Build a `Command` that runs a single prompt and streams its output.
///
/// Uses `-p` for non-interactive prompt execution, and `--verbose` with
/// `--output-format stream-json` for structured streaming output.
#[must_use]
pub fn build_command(prompt: &str, options: &QueryOptions) -> Command {
    let mut cmd = base_command(options);
    cmd.arg("-p").arg(prompt);
    cmd.arg("--verbose");
    cmd.arg("--output-format").arg("stream-json");
    append_options(&mut cmd, options);
    cmd
}

/// Build a `Command` for a persistent session.
///
/// The process stays alive reading stream-json user messages from stdin and
/// answering each with stream-json output ending in a `result` message.
#[must_use]
pub fn build_session_command(options: &QueryOptions) -> Command {
    let mut cmd = base_command(options);
    cmd.arg("-p");
    cmd.arg("--verbose");
    cmd.arg("--input-format").arg("stream-json");
    cmd.arg("--output-format").arg("stream-json");
    append_options(&mut cmd, options);
    cmd
}

fn base_command(options: &QueryOptions) -> Command {
    let mut cmd = Command::new(options.program());
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    cmd
}

fn append_options(cmd: &mut Command, options: &QueryOptions) {
    if let Some(model) = &options.model {
        cmd.arg("--model").arg(model);
    }

    if let Some(system_prompt) = &options.system_prompt {
        cmd.arg("--system-prompt").arg(system_prompt);
    }

    if options.permission_mode != PermissionMode::Default {
        cmd.arg("--permission-mode")
            .arg(options.permission_mode.as_str());
    }

    if !options.allowed_tools.is_empty() {
        cmd.arg("--allowedTools");
        for tool in &options.allowed_tools {
            cmd.arg(tool);
        }
    }

    if let Some(max_turns) = options.max_turns {
        cmd.arg("--max-turns").arg(max_turns.to_string());
    }
}
