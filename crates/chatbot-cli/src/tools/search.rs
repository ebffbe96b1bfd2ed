//! Chat search

use std::sync::Arc;

use async_trait::async_trait;
use chatbot_agent::SearchScope;
use chatbot_agent::tool::{Tool, ToolContext, ToolError, ToolResult, names, parse_args};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend::ChatBackend;

#[derive(Deserialize)]
struct SearchArgs {
    text: String,
    #[serde(default)]
    search_type: Option<SearchScope>,
}

/// Searches chats through the backend and returns the ranked hits as JSON
pub struct SearchTool {
    backend: Arc<dyn ChatBackend>,
}

impl SearchTool {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        names::SEARCH
    }

    fn description(&self) -> &str {
        "Search in chats. Returns ranked search results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to search for."
                },
                "search_type": {
                    "type": "string",
                    "enum": ["PUBLIC", "PRIVATE", "GENERAL"],
                    "description": "Which chats to search. Defaults to the scope from classify_search_scope."
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        arguments: Value,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let args: SearchArgs = parse_args(arguments)?;
        let scope = args.search_type.unwrap_or(ctx.state.search_scope);

        let response = self
            .backend
            .search(ctx.auth, &args.text, scope.backend_code())
            .await?;

        let hits = match response {
            Value::Array(_) => response,
            // An empty body comes back as {}
            Value::Object(ref map) if map.is_empty() => json!([]),
            other => {
                return Err(ToolError::Failed(format!(
                    "Search returned an unexpected response: {}",
                    crate::utils::truncate_chars(&other.to_string(), 200)
                )));
            }
        };
        tracing::debug!(
            scope = %scope,
            hits = hits.as_array().map(Vec::len).unwrap_or(0),
            "search finished"
        );
        Ok(ToolResult::json(&hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, MockBackend};
    use crate::tools::testing::context;
    use chatbot_agent::ConversationState;

    #[tokio::test]
    async fn test_explicit_scope_is_sent_as_code() {
        let backend = Arc::new(MockBackend::with_hits(json!([{"link": "a"}])));
        let tool = SearchTool::new(backend.clone());
        let state = ConversationState::new();

        let result = tool
            .execute(json!({"text": "rust", "search_type": "PUBLIC"}), &context(&state, Some("t")))
            .await
            .unwrap();
        assert_eq!(result.text_content(), r#"[{"link":"a"}]"#);
        assert_eq!(
            backend.calls(),
            vec![Call::Search {
                auth: Some("t".into()),
                text: "rust".into(),
                search_type: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_scope_uses_state() {
        let backend = Arc::new(MockBackend::with_hits(json!([])));
        let tool = SearchTool::new(backend.clone());
        let mut state = ConversationState::new();
        state.search_scope = SearchScope::Private;

        tool.execute(json!({"text": "rust"}), &context(&state, None)).await.unwrap();
        state.search_scope = SearchScope::Uncertain;
        tool.execute(json!({"text": "go"}), &context(&state, None)).await.unwrap();

        let codes: Vec<u8> = backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Search { search_type, .. } => Some(search_type),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_empty_body_means_no_hits() {
        let tool = SearchTool::new(Arc::new(MockBackend::with_hits(json!({}))));
        let state = ConversationState::new();
        let result = tool.execute(json!({"text": "x"}), &context(&state, None)).await.unwrap();
        assert_eq!(result.text_content(), "[]");
    }

    #[tokio::test]
    async fn test_unknown_scope_is_invalid_argument() {
        let tool = SearchTool::new(Arc::new(MockBackend::default()));
        let state = ConversationState::new();
        let err = tool
            .execute(json!({"text": "x", "search_type": "EVERYWHERE"}), &context(&state, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
