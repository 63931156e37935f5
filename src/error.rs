//! Error taxonomy
//!
//! `ClaudeError` describes what can go wrong while driving the `claude`
//! process. `ChatError` is what callers of the chat model see: the three
//! process failures are folded into a single runtime failure carrying
//! actionable text.

use thiserror::Error;

/// Install command printed whenever the CLI cannot be found.
pub const INSTALL_HINT: &str = "npm install -g @anthropic-ai/claude-code";

/// Failures raised while spawning or talking to the `claude` process.
#[derive(Debug, Error)]
pub enum ClaudeError {
    /// The `claude` binary could not be located or executed.
    #[error("could not launch '{path}': {reason}")]
    CliNotFound {
        /// Program path that was attempted
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// The process exited unsuccessfully.
    #[error("process exited with {}", exit_code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Process {
        /// Exit code, `None` if killed by a signal
        exit_code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },

    /// A stdout line was not valid JSON.
    #[error("invalid JSON from claude: {source}")]
    JsonDecode {
        /// The offending line
        line: String,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// The session process is gone or was never started.
    #[error("session is not connected")]
    NotConnected,

    /// Any other I/O failure on the child's pipes.
    #[error("I/O error talking to claude: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures turning a conversation into a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// No messages at all.
    #[error("conversation cannot be empty")]
    EmptyConversation,
    /// Every message was empty or had no text content.
    #[error("conversation has no message with text content")]
    NoContent,
}

/// Errors surfaced by the chat model.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The CLI binary is missing at construction time.
    #[error("{0}")]
    MissingDependency(String),

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The conversation could not be flattened into a prompt.
    #[error(transparent)]
    InvalidInput(#[from] ConvertError),

    /// A process, parse or model failure with context appended.
    #[error("{0}")]
    Runtime(String),

    /// Session-level failure that is not one of the translated kinds.
    #[error(transparent)]
    Claude(ClaudeError),
}

impl From<ClaudeError> for ChatError {
    fn from(err: ClaudeError) -> Self {
        match err {
            ClaudeError::CliNotFound { .. } => Self::Runtime(format!(
                "Claude Code CLI not found: {err}\nPlease install: {INSTALL_HINT}"
            )),
            ClaudeError::Process {
                exit_code,
                ref stderr,
            } => Self::Runtime(format!(
                "Claude Code process error (exit code {}): {err}\nStderr: {}",
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                stderr.trim()
            )),
            ClaudeError::JsonDecode { ref line, .. } => Self::Runtime(format!(
                "Failed to parse Claude Code response: {err}\nInvalid line: {line}"
            )),
            other => {
                tracing::error!(error = %other, "Error generating response");
                Self::Claude(other)
            }
        }
    }
}

impl ChatError {
    /// Runtime failure reported by a terminal `result` message.
    #[must_use]
    pub fn model_error(result: &str) -> Self {
        Self::Runtime(format!("Claude Code error: {result}"))
    }
}
