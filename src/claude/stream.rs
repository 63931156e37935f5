//! Stream-JSON parser for Claude Code's `--output-format stream-json` output
//!
//! Parses newline-delimited JSON messages from Claude Code into structured
//! `Message` variants. Unlike a display-only parser, a line that is not JSON
//! is a hard error: the chat model reports it with the offending line.

use serde_json::Value;

use crate::error::ClaudeError;

/// One content block inside an assistant message
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Visible assistant text
    Text {
        /// The text content
        text: String,
    },
    /// Extended-thinking trace
    Thinking {
        /// The thinking text
        thinking: String,
    },
    /// Tool use request by the assistant
    ToolUse {
        /// Tool name (e.g., "Edit", "Bash")
        name: String,
        /// Tool input as raw JSON
        input: Value,
    },
    /// Tool execution result
    ToolResult {
        /// Whether the tool failed
        is_error: bool,
        /// Content of the result
        content: String,
    },
}

/// Terminal message of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    /// Result subtype ("success", "error_max_turns", ...)
    pub subtype: String,
    /// Whether the turn failed
    pub is_error: bool,
    /// Human-readable result text
    pub result: Option<String>,
    /// Number of conversation turns
    pub num_turns: u32,
    /// Total cost in USD
    pub total_cost_usd: Option<f64>,
    /// Duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Session the turn belonged to
    pub session_id: Option<String>,
    /// Raw token usage object
    pub usage: Option<Value>,
}

/// A parsed message from Claude Code's stream-json output
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// System message (`init` carries the model and session ID)
    System {
        /// System subtype
        subtype: String,
        /// The model being used, if reported
        model: Option<String>,
        /// Session ID, if reported
        session_id: Option<String>,
    },
    /// Assistant output with its content blocks
    Assistant {
        /// Content blocks in order
        content: Vec<ContentBlock>,
        /// Model that produced the message
        model: Option<String>,
    },
    /// Echoed user / tool-result message
    User {
        /// Content blocks (tool results)
        content: Vec<ContentBlock>,
    },
    /// Final result of the turn
    Result(ResultMessage),
    /// Unrecognized message type
    Unknown {
        /// The raw message type string
        message_type: String,
    },
}

impl Message {
    /// Session ID carried by this message, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System { session_id, .. } => session_id.as_deref(),
            Self::Result(result) => result.session_id.as_deref(),
            _ => None,
        }
    }
}

/// Parse a single line of stream-json output into a `Message`.
///
/// Returns `Ok(None)` for blank lines and for JSON objects without a `type`
/// field. Lines that are not valid JSON fail with `ClaudeError::JsonDecode`.
pub fn parse_message(line: &str) -> Result<Option<Message>, ClaudeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line).map_err(|source| ClaudeError::JsonDecode {
        line: line.to_string(),
        source,
    })?;
    let Some(message_type) = value.get("type").and_then(Value::as_str) else {
        return Ok(None);
    };

    let message = match message_type {
        "system" => parse_system_message(&value),
        "assistant" => Message::Assistant {
            content: parse_content_blocks(value.get("message")),
            model: value
                .pointer("/message/model")
                .and_then(Value::as_str)
                .map(String::from),
        },
        "user" => Message::User {
            content: parse_content_blocks(value.get("message")),
        },
        "result" => Message::Result(parse_result_message(&value)),
        other => Message::Unknown {
            message_type: other.to_string(),
        },
    };
    Ok(Some(message))
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

fn parse_system_message(value: &Value) -> Message {
    Message::System {
        subtype: str_field(value, "subtype").unwrap_or_default(),
        model: str_field(value, "model"),
        session_id: str_field(value, "session_id"),
    }
}

fn parse_content_blocks(message: Option<&Value>) -> Vec<ContentBlock> {
    let Some(content) = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    content.iter().filter_map(parse_content_block).collect()
}

fn parse_content_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type")?.as_str()? {
        "text" => Some(ContentBlock::Text {
            text: str_field(block, "text")?,
        }),
        "thinking" => Some(ContentBlock::Thinking {
            thinking: str_field(block, "thinking")?,
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            name: str_field(block, "name").unwrap_or_else(|| "unknown".to_string()),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => {
            let is_error = block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            // Tool results carry either a plain string or a list of text blocks
            let content = match block.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            Some(ContentBlock::ToolResult { is_error, content })
        }
        _ => None,
    }
}

fn parse_result_message(value: &Value) -> ResultMessage {
    ResultMessage {
        subtype: str_field(value, "subtype").unwrap_or_default(),
        is_error: value
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        result: str_field(value, "result"),
        num_turns: value
            .get("num_turns")
            .and_then(Value::as_u64)
            .map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX)),
        total_cost_usd: value.get("total_cost_usd").and_then(Value::as_f64),
        duration_ms: value.get("duration_ms").and_then(Value::as_u64),
        session_id: str_field(value, "session_id"),
        usage: value.get("usage").filter(|u| !u.is_null()).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Message {
        parse_message(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_empty_line_returns_none() {
        assert!(parse_message("").unwrap().is_none());
        assert!(parse_message("   ").unwrap().is_none());
    }

    #[test]
    fn test_parse_invalid_json_is_an_error_with_line() {
        let err = parse_message("not json").unwrap_err();
        match err {
            ClaudeError::JsonDecode { line, .. } => assert_eq!(line, "not json"),
            other => panic!("Expected JsonDecode, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_type_returns_none() {
        assert!(parse_message(r#"{"data":"no type field"}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_system_init_message() {
        let line = r#"{"type":"system","subtype":"init","cwd":"/tmp","session_id":"f9c16ac1","tools":["Read"],"model":"claude-sonnet-4-20250514","permissionMode":"default"}"#;
        match parse(line) {
            Message::System {
                subtype,
                model,
                session_id,
            } => {
                assert_eq!(subtype, "init");
                assert_eq!(model.as_deref(), Some("claude-sonnet-4-20250514"));
                assert_eq!(session_id.as_deref(), Some("f9c16ac1"));
            }
            other => panic!("Expected System, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_assistant_keeps_all_blocks_in_order() {
        let line = r#"{"type":"assistant","message":{"model":"claude-sonnet-4-20250514","content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"Hello"},{"type":"tool_use","name":"Read","input":{"file_path":"a.rs"}}]}}"#;
        match parse(line) {
            Message::Assistant { content, model } => {
                assert_eq!(model.as_deref(), Some("claude-sonnet-4-20250514"));
                assert_eq!(content.len(), 3);
                assert_eq!(
                    content[0],
                    ContentBlock::Thinking {
                        thinking: "hmm".to_string()
                    }
                );
                assert_eq!(
                    content[1],
                    ContentBlock::Text {
                        text: "Hello".to_string()
                    }
                );
                match &content[2] {
                    ContentBlock::ToolUse { name, input } => {
                        assert_eq!(name, "Read");
                        assert_eq!(input["file_path"], "a.rs");
                    }
                    other => panic!("Expected ToolUse, got {other:?}"),
                }
            }
            other => panic!("Expected Assistant, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_user_tool_result_with_block_list() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","is_error":true,"content":[{"type":"text","text":"denied"}]}]}}"#;
        match parse(line) {
            Message::User { content } => {
                assert_eq!(
                    content,
                    vec![ContentBlock::ToolResult {
                        is_error: true,
                        content: "denied".to_string()
                    }]
                );
            }
            other => panic!("Expected User, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_real_world_result() {
        let line = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":2166,"duration_api_ms":2142,"num_turns":1,"result":"Hello! How can I help you today?","session_id":"f9c16ac1","total_cost_usd":0.12109,"usage":{"input_tokens":3},"permission_denials":[]}"#;
        match parse(line) {
            Message::Result(result) => {
                assert!(!result.is_error);
                assert_eq!(result.subtype, "success");
                assert_eq!(
                    result.result.as_deref(),
                    Some("Hello! How can I help you today?")
                );
                assert_eq!(result.num_turns, 1);
                assert!((result.total_cost_usd.unwrap() - 0.12109).abs() < 0.00001);
                assert_eq!(result.duration_ms, Some(2166));
                assert_eq!(result.session_id.as_deref(), Some("f9c16ac1"));
                assert_eq!(result.usage.unwrap()["input_tokens"], 3);
            }
            other => panic!("Expected Result, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_result_error_message() {
        let line = r#"{"type":"result","subtype":"error_during_execution","is_error":true,"num_turns":1,"result":"Error occurred"}"#;
        match parse(line) {
            Message::Result(result) => {
                assert!(result.is_error);
                assert!(result.total_cost_usd.is_none());
                assert!(result.usage.is_none());
            }
            other => panic!("Expected Result, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_message_type() {
        match parse(r#"{"type":"heartbeat","data":"ping"}"#) {
            Message::Unknown { message_type } => assert_eq!(message_type, "heartbeat"),
            other => panic!("Expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_session_id_accessor() {
        let init = parse(r#"{"type":"system","subtype":"init","session_id":"abc"}"#);
        assert_eq!(init.session_id(), Some("abc"));
        let text = parse(r#"{"type":"assistant","message":{"content":[]}}"#);
        assert_eq!(text.session_id(), None);
    }
}
