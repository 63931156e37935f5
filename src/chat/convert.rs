//! Conversation → prompt flattening
//!
//! The CLI takes a single prompt string, so a conversation is flattened into
//! role-prefixed text blocks. Non-text content is dropped with a warning.

use crate::chat::message::{ChatMessage, Content, ContentPart, Role};
use crate::error::ConvertError;

/// Separator between message blocks.
const BLOCK_SEPARATOR: &str = "\n\n";

/// Flatten a conversation into a prompt string.
///
/// Each message becomes `"<Role>: <text>"` with its text trimmed and
/// backslashes and double quotes escaped. Messages without text are skipped.
pub fn to_prompt(conversation: &[ChatMessage]) -> Result<String, ConvertError> {
    if conversation.is_empty() {
        return Err(ConvertError::EmptyConversation);
    }

    let mut blocks = Vec::with_capacity(conversation.len());
    for (index, message) in conversation.iter().enumerate() {
        let Some(content) = &message.content else {
            tracing::warn!(index, "message has no content, skipping");
            continue;
        };

        let text = text_of(content, index);
        let text = text.trim();
        if text.is_empty() {
            tracing::warn!(index, "message has empty content, skipping");
            continue;
        }

        let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
        blocks.push(format!("{}{escaped}", prefix(message.role)));
    }

    if blocks.is_empty() {
        return Err(ConvertError::NoContent);
    }

    Ok(blocks.join(BLOCK_SEPARATOR))
}

/// Whether the conversation carries its own system instructions.
#[must_use]
pub fn has_system_message(conversation: &[ChatMessage]) -> bool {
    conversation.iter().any(|m| m.role == Role::System)
}

const fn prefix(role: Role) -> &'static str {
    match role {
        Role::System => "System: ",
        Role::Human => "Human: ",
        Role::Assistant => "Assistant: ",
        Role::Tool => "Tool Result: ",
    }
}

fn text_of(content: &Content, index: usize) -> String {
    match content {
        Content::Text(text) => text.clone(),
        Content::Parts(parts) => {
            let mut texts = Vec::new();
            let mut dropped = 0usize;
            for part in parts {
                match part {
                    ContentPart::Text { text } => texts.push(text.as_str()),
                    ContentPart::ImageUrl { .. } => dropped += 1,
                }
            }
            if dropped > 0 {
                tracing::warn!(index, dropped, "non-text content is not supported, dropping");
            }
            texts.join("\n")
        }
    }
}
