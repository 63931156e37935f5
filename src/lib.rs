//! claude-chat - Claude Code as a chat model
//!
//! Exposes the Claude Code CLI through a `ChatModel` contract with
//! single-shot and streaming generation, sync and async. Each call spawns
//! `claude -p --output-format stream-json`, or reuses a persistent session.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod chat;
pub mod claude;
pub mod cli;
pub mod error;

// Re-export commonly used types
pub use chat::convert::to_prompt;
pub use chat::{
    AiMessage, BlockingChunks, ChatChunk, ChatMessage, ChatModel, ChatModelConfig, ChatResult,
    ChunkStream, ClaudeCodeChatModel, Role, UsageMetadata,
};
pub use claude::{query, Message, QueryOptions, Session};
pub use error::{ChatError, ClaudeError, ConvertError};
