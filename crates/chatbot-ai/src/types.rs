//! Core types for LLM interactions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "claude-3-haiku-20240307")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Base URL for API calls
    pub base_url: String,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    /// An Anthropic model served from the public API endpoint
    pub fn anthropic(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            max_tokens: 4096,
            headers: HashMap::new(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    pub cache_read: u32,
    pub cache_write: u32,
}

impl Usage {
    /// Add another usage record into this one
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
    }
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Tool use requested
    ToolUse,
    /// Error occurred
    Error,
}

/// Per-conversation message sequence number.
///
/// Assigned by the conversation state when a message is appended. Ids grow
/// strictly within a conversation, so "newer than" is a plain comparison.
/// `MessageId::PENDING` marks a message that has not been appended yet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const PENDING: MessageId = MessageId(0);

    /// The id following this one
    pub fn next(self) -> Self {
        MessageId(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content types in messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Text content
    Text { text: String },
    /// Tool call request
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// A provider block the bot does not interpret (thinking, server tools, ...)
    Unsupported { kind: String },
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool call
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A conversation message.
///
/// Every role shares the same accessors, so callers never need to know
/// which variant they hold to read its id, text or tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Message typed by the user
    Human {
        #[serde(default)]
        id: MessageId,
        content: Vec<Content>,
        #[serde(default)]
        timestamp: i64,
    },
    /// Model response
    Ai {
        #[serde(default)]
        id: MessageId,
        content: Vec<Content>,
        #[serde(flatten)]
        metadata: AiMetadata,
    },
    /// Tool result
    Tool {
        #[serde(default)]
        id: MessageId,
        tool_call_id: String,
        tool_name: String,
        content: Vec<Content>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        timestamp: i64,
    },
    /// Instruction or context injected by the bot itself
    System {
        #[serde(default)]
        id: MessageId,
        content: Vec<Content>,
        #[serde(default)]
        timestamp: i64,
    },
}

/// Metadata for model responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiMetadata {
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Message {
    /// Create a human message with text content
    pub fn human(text: impl Into<String>) -> Self {
        Self::Human {
            id: MessageId::PENDING,
            content: vec![Content::text(text)],
            timestamp: now_millis(),
        }
    }

    /// Create a system message with text content
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            id: MessageId::PENDING,
            content: vec![Content::text(text)],
            timestamp: now_millis(),
        }
    }

    /// Create a model response from content blocks
    pub fn ai(content: Vec<Content>) -> Self {
        Self::Ai {
            id: MessageId::PENDING,
            content,
            metadata: AiMetadata {
                timestamp: now_millis(),
                ..Default::default()
            },
        }
    }

    /// Create a model response holding a single text block
    pub fn ai_text(text: impl Into<String>) -> Self {
        Self::ai(vec![Content::text(text)])
    }

    /// Create an empty model response
    pub fn ai_empty() -> Self {
        Self::ai(vec![])
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Content>,
        is_error: bool,
    ) -> Self {
        Self::Tool {
            id: MessageId::PENDING,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            is_error,
            timestamp: now_millis(),
        }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::Human { .. } => "human",
            Self::Ai { .. } => "ai",
            Self::Tool { .. } => "tool",
            Self::System { .. } => "system",
        }
    }

    pub fn id(&self) -> MessageId {
        match self {
            Self::Human { id, .. }
            | Self::Ai { id, .. }
            | Self::Tool { id, .. }
            | Self::System { id, .. } => *id,
        }
    }

    pub fn set_id(&mut self, new_id: MessageId) {
        match self {
            Self::Human { id, .. }
            | Self::Ai { id, .. }
            | Self::Tool { id, .. }
            | Self::System { id, .. } => *id = new_id,
        }
    }

    /// Get the content blocks
    pub fn content(&self) -> &[Content] {
        match self {
            Self::Human { content, .. }
            | Self::Ai { content, .. }
            | Self::Tool { content, .. }
            | Self::System { content, .. } => content,
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human { .. })
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Ai { .. })
    }

    /// Name of the tool that produced this message, if it is a tool result
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Tool { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }

    /// True for a tool result from `name` that did not fail
    pub fn is_successful_result_of(&self, name: &str) -> bool {
        matches!(self, Self::Tool { tool_name, is_error: false, .. } if tool_name == name)
    }

    /// True for an AI message with nothing to say and nothing to call.
    ///
    /// Such messages are what a streaming failure leaves behind; the
    /// conversation state retracts them before appending anything new.
    pub fn is_empty_ai(&self) -> bool {
        match self {
            Self::Ai { content, .. } => content.iter().all(|c| match c {
                Content::Text { text } => text.is_empty(),
                _ => false,
            }),
            _ => false,
        }
    }

    /// Extract all tool calls from an AI message
    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        match self {
            Self::Ai { content, .. } => content
                .iter()
                .filter_map(|c| match c {
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some((id.as_str(), name.as_str(), arguments)),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content()
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl Tool {
    /// Create a new tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Context for an LLM request
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Available tools
    pub tools: Vec<Tool>,
}

/// Options for streaming requests
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 1.0)
    pub temperature: Option<f32>,
    /// Stop sequences
    pub stop_sequences: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ai_detection() {
        assert!(Message::ai_empty().is_empty_ai());
        assert!(Message::ai_text("").is_empty_ai());
        assert!(!Message::ai_text("hi").is_empty_ai());
        let call = Content::tool_call("c1", "reply", serde_json::json!({}));
        assert!(!Message::ai(vec![call]).is_empty_ai());
        assert!(!Message::ai(vec![Content::Unsupported { kind: "thinking".into() }]).is_empty_ai());
        assert!(!Message::human("").is_empty_ai());
    }

    #[test]
    fn test_tool_calls_only_from_ai() {
        let msg = Message::ai(vec![
            Content::text("looking"),
            Content::tool_call("c1", "search_in_chats", serde_json::json!({"text": "rust"})),
        ]);
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "c1");
        assert_eq!(calls[0].1, "search_in_chats");
        assert!(Message::human("x").tool_calls().is_empty());
    }

    #[test]
    fn test_message_serde_is_role_tagged() {
        let mut msg =
            Message::tool_result("c1", "search_in_chats", vec![Content::text("[]")], true);
        msg.set_id(MessageId(7));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["id"], 7);
        assert_eq!(json["is_error"], true);

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), MessageId(7));
        assert_eq!(back.tool_name(), Some("search_in_chats"));
        assert!(!back.is_successful_result_of("search_in_chats"));
    }

    #[test]
    fn test_missing_id_deserializes_as_pending() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"human","content":[{"type":"text","text":"hello"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.id(), MessageId::PENDING);
        assert_eq!(msg.text(), "hello");
    }

    #[test]
    fn test_message_id_ordering() {
        assert!(MessageId(3) > MessageId(2));
        assert_eq!(MessageId(2).next(), MessageId(3));
        assert_eq!(MessageId(5).to_string(), "5");
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage {
            input: 10,
            output: 2,
            cache_read: 1,
            cache_write: 0,
        });
        total.add(&Usage {
            input: 5,
            output: 3,
            cache_read: 0,
            cache_write: 4,
        });
        assert_eq!(
            total,
            Usage {
                input: 15,
                output: 5,
                cache_read: 1,
                cache_write: 4,
            }
        );
    }
}
