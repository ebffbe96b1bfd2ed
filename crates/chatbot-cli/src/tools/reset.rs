//! Starting the conversation over

use async_trait::async_trait;
use chatbot_agent::tool::{Tool, ToolContext, ToolError, ToolResult, names};
use serde_json::json;

/// Acknowledges a "start over" request. The state updater does the clearing
/// when it sees this tool's result.
pub struct ResetTool;

#[async_trait]
impl Tool for ResetTool {
    fn name(&self) -> &str {
        names::RESET
    }

    fn description(&self) -> &str {
        "Forget the conversation summary, the search scope and the last search results. Call when the user asks to start over."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        tracing::info!(thread_id = %ctx.thread_id, "conversation reset requested");
        Ok(ToolResult::text("Conversation state cleared."))
    }
}
