//! Search scope classification as a tool

use std::sync::Arc;

use async_trait::async_trait;
use chatbot_agent::SearchScopeClassifier;
use chatbot_agent::tool::{Tool, ToolContext, ToolError, ToolResult, names};
use serde_json::json;

/// Works out which chats the user wants searched
pub struct ClassifyTool {
    classifier: Arc<SearchScopeClassifier>,
}

impl ClassifyTool {
    pub fn new(classifier: Arc<SearchScopeClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Tool for ClassifyTool {
    fn name(&self) -> &str {
        names::CLASSIFY
    }

    fn description(&self) -> &str {
        "Call to get the search type: PUBLIC, PRIVATE or GENERAL."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let scope = self
            .classifier
            .classify(ctx.state, ctx.cancel.clone())
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(ToolResult::text(scope.as_str()))
    }
}
