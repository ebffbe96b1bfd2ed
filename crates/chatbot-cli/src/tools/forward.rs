//! Forwarding search hits to the user

use std::sync::Arc;

use async_trait::async_trait;
use chatbot_agent::state::links;
use chatbot_agent::tool::{Tool, ToolContext, ToolError, ToolResult, names, parse_args};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::backend::ChatBackend;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(
        "Can not forward last search result. It could be that the last search_in_public_chats tool call was not successfull or returned an empty result."
    )]
    NoSearchResults,
}

impl From<ForwardError> for ToolError {
    fn from(e: ForwardError) -> Self {
        ToolError::Failed(e.to_string())
    }
}

#[derive(Deserialize)]
struct ForwardArgs {
    comment: String,
}

/// Sends the links of the last search to the user with a comment
pub struct ForwardTool {
    backend: Arc<dyn ChatBackend>,
}

impl ForwardTool {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ForwardTool {
    fn name(&self) -> &str {
        names::FORWARD
    }

    fn description(&self) -> &str {
        "Forward last search results to the user with a comment. Use it when the last search results are relevant and should be sent to the user."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "comment": {
                    "type": "string",
                    "description": "A comment to add along with the search results."
                }
            },
            "required": ["comment"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let args: ForwardArgs = parse_args(arguments)?;

        let hits = ctx.state.last_search_hits();
        if hits.is_empty() {
            return Err(ForwardError::NoSearchResults.into());
        }

        let links = links(&hits);
        self.backend
            .forward_links(ctx.auth, &args.comment, &links)
            .await?;
        Ok(ToolResult::text(format!("Forwarded {} link(s).", links.len())))
    }
}
