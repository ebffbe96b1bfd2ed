//! Sending messages to the user

use std::sync::Arc;

use async_trait::async_trait;
use chatbot_agent::tool::{Tool, ToolContext, ToolError, ToolResult, names, parse_args};
use serde::Deserialize;
use serde_json::json;

use crate::backend::ChatBackend;

#[derive(Deserialize)]
struct ReplyArgs {
    message: String,
}

/// Posts a message into the user's conversation
pub struct ReplyTool {
    backend: Arc<dyn ChatBackend>,
}

impl ReplyTool {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ReplyTool {
    fn name(&self) -> &str {
        names::REPLY
    }

    fn description(&self) -> &str {
        "Send a message to the user."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "A message to send."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let args: ReplyArgs = parse_args(arguments)?;
        self.backend.reply(ctx.auth, &args.message).await?;
        Ok(ToolResult::text("Message sent."))
    }
}
