//! Conversation and response types

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The user
    Human,
    /// The model
    Assistant,
    /// Output of a tool call
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::Human => "human",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        })
    }
}

/// One part of a multimodal message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Image reference; not representable in a text prompt
    ImageUrl {
        /// Image location or data URL
        url: String,
    },
}

/// Message body: plain text or a list of parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text
    Text(String),
    /// Multimodal parts
    Parts(Vec<ContentPart>),
}

/// A role-tagged conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role
    pub role: Role,
    /// Body; `None` for messages that carry no content
    pub content: Option<Content>,
}

impl ChatMessage {
    /// Message with the given role and text
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(Content::Text(text.into())),
        }
    }

    /// System message
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Human message
    #[must_use]
    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Role::Human, text)
    }

    /// Assistant message
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Tool output message
    #[must_use]
    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(Role::Tool, text)
    }

    /// Message made of multimodal parts
    #[must_use]
    pub const fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Some(Content::Parts(parts)),
        }
    }
}

/// Incremental piece of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatChunk {
    /// Text delta; empty for thinking-only chunks
    pub content: String,
    /// Thinking trace carried alongside
    pub thinking: Option<String>,
}

impl ChatChunk {
    /// Chunk carrying text
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thinking: None,
        }
    }

    /// Empty-text chunk carrying a thinking trace
    #[must_use]
    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            thinking: Some(thinking.into()),
        }
    }
}

/// Usage data taken from the terminal `result` message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageMetadata {
    /// Raw token usage object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// Total cost in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Wall-clock duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// CLI session the turn ran in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Agentic turns used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
}

/// Complete assistant reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiMessage {
    /// Concatenated text
    pub content: String,
    /// Concatenated thinking, if any
    pub thinking: Option<String>,
    /// Model that was requested
    pub model: String,
}

/// Result of one single-shot generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResult {
    /// The reply
    pub message: AiMessage,
    /// Usage metadata
    pub usage: UsageMetadata,
}
