//! Chat-model layer
//!
//! Conversation types, prompt flattening, the streaming bridge and the
//! `ChatModel` adapter built on top of the Claude Code integration.

pub mod bridge;
pub mod config;
pub mod convert;
pub mod message;
pub mod model;

pub use bridge::{BlockingChunks, ChunkStream};
pub use config::ChatModelConfig;
pub use message::{AiMessage, ChatChunk, ChatMessage, ChatResult, Role, UsageMetadata};
pub use model::{ChatModel, ClaudeCodeChatModel};
