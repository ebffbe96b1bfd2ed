//! Tool trait and execution

use async_trait::async_trait;
use chatbot_ai::Content;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::state::ConversationState;

/// Names of the tools the conversation machinery recognizes.
pub mod names {
    /// Sends a message to the user
    pub const REPLY: &str = "reply";
    /// Searches chats; its results feed `last_search_result`
    pub const SEARCH: &str = "search_in_chats";
    /// Forwards the last search hits to the user
    pub const FORWARD: &str = "forward_search_results";
    /// Classifies the search scope; its result updates `search_scope`
    pub const CLASSIFY: &str = "classify_search_scope";
    /// Clears summary, scope and cached search hits
    pub const RESET: &str = "reset_conversation";
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the LLM
    pub content: Vec<Content>,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }

    /// Create a successful result holding a JSON value as text
    pub fn json(value: &serde_json::Value) -> Self {
        Self::text(value.to_string())
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Why a tool did not produce a result.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match what the tool needs
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool failed in a way the model can react to
    #[error("{0}")]
    Failed(String),

    /// The backend call failed; the turn cannot continue
    #[error("Backend call failed: {0}")]
    Backend(String),
}

impl ToolError {
    /// Fatal errors abort the whole turn instead of becoming a failed result
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::Backend(_))
    }
}

/// What a tool can see while it runs.
pub struct ToolContext<'a> {
    /// Conversation state as of this call, including earlier results of the same round
    pub state: &'a ConversationState,
    pub thread_id: &'a str,
    /// Authorization header value forwarded from the inbound request
    pub auth: Option<&'a str>,
    pub cancel: CancellationToken,
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError>;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a chatbot_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> chatbot_ai::Tool {
    chatbot_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// Deserialize tool arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(arguments: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
