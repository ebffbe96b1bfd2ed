//! Conversation summarization
//!
//! Once the message window grows past a threshold, the whole window is folded
//! into the running summary and removed. Cached search hits are recomputed
//! from the window first so `forward_search_results` keeps working.

use chatbot_ai::{Content, Message, MessageId, Model};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::prompts::{PromptKey, PromptSelector};
use crate::state::{ConversationState, SearchHit};
use crate::transport::{RunConfig, Transport, complete};

/// Tool results longer than this are cut in the transcript
const MAX_TOOL_RESULT_CHARS: usize = 2000;
const MAX_ARG_CHARS: usize = 100;

/// When and how to summarize
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Summarize once the window holds at least this many messages
    pub threshold: usize,
    /// Token limit of the summary response
    pub max_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold: 1000,
            max_tokens: 1024,
        }
    }
}

/// Result of a summarization, not yet applied to the state
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: String,
    /// Ids of every message that was summarized
    pub removed: Vec<MessageId>,
    pub last_search_result: Vec<SearchHit>,
}

impl SummaryOutcome {
    /// Store the summary and drop the summarized messages.
    pub fn apply(self, state: &mut ConversationState) {
        state.summary = Some(self.summary);
        state.last_search_result = self.last_search_result;
        state.remove_all(&self.removed);
    }
}

pub fn should_summarize(state: &ConversationState, config: &SummarizerConfig) -> bool {
    let len = state.messages().len();
    len > 0 && len >= config.threshold
}

/// Render messages as a plain transcript, one `Role: text` line each.
pub fn buffer_string(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg {
            Message::Human { content, .. } => {
                lines.push(format!("Human: {}", content_text(content)))
            }
            Message::System { content, .. } => {
                lines.push(format!("System: {}", content_text(content)))
            }
            Message::Ai { content, .. } => {
                let text = content_text(content);
                let calls: Vec<String> = msg
                    .tool_calls()
                    .into_iter()
                    .map(|(_, name, args)| format!("{}({})", name, format_tool_args(args)))
                    .collect();
                let line = match (text.is_empty(), calls.is_empty()) {
                    (false, true) => text,
                    (true, false) => calls.join("; "),
                    (false, false) => format!("{} {}", text, calls.join("; ")),
                    (true, true) => continue,
                };
                lines.push(format!("AI: {}", line));
            }
            Message::Tool {
                tool_name,
                content,
                is_error,
                ..
            } => {
                let text = content_text(content);
                let body = match text.char_indices().nth(MAX_TOOL_RESULT_CHARS) {
                    Some((cut, _)) => format!("{}...(truncated)", &text[..cut]),
                    None => text,
                };
                let status = if *is_error { " error" } else { "" };
                lines.push(format!("Tool ({}{}): {}", tool_name, status, body));
            }
        }
    }

    lines.join("\n")
}

fn content_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(Content::as_text)
        .collect::<Vec<_>>()
        .join("")
}

fn shorten(s: &str) -> String {
    match s.char_indices().nth(MAX_ARG_CHARS) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

fn format_tool_args(args: &serde_json::Value) -> String {
    match args {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let val = match v {
                    serde_json::Value::String(s) => format!("\"{}\"", shorten(s)),
                    other => shorten(&other.to_string()),
                };
                format!("{}={}", k, val)
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => args.to_string(),
    }
}

/// Summarize the whole window with one tool-free model call.
pub async fn summarize(
    state: &ConversationState,
    config: &SummarizerConfig,
    model: &Model,
    transport: &dyn Transport,
    prompts: &dyn PromptSelector,
    cancel: CancellationToken,
) -> Result<SummaryOutcome> {
    let instruction = match state.summary.as_deref() {
        Some(summary) => prompts
            .select(PromptKey::SummaryExtend)?
            .render(&[("summary", summary)])?,
        None => prompts.select(PromptKey::SummaryCreate)?.render(&[])?,
    };

    let request = vec![
        Message::system(buffer_string(state.messages())),
        Message::human(instruction),
    ];
    let mut run_config = RunConfig::plain(model.clone(), None);
    run_config.max_tokens = Some(config.max_tokens);

    let response = complete(transport, request, &run_config, cancel)
        .await
        .map_err(|e| Error::Summarization(e.to_string()))?;
    let summary = response.text();
    if summary.trim().is_empty() {
        return Err(Error::Summarization("model returned an empty summary".into()));
    }

    Ok(SummaryOutcome {
        summary,
        removed: state.messages().iter().map(Message::id).collect(),
        last_search_result: state.last_search_hits(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::BuiltinPrompts;
    use crate::state::links;
    use crate::testing::{ScriptedTransport, test_model};
    use crate::tool::names;
    use serde_json::json;

    fn conversation() -> ConversationState {
        let mut state = ConversationState::new();
        state.append(Message::human("find chats about rust"));
        state.append(Message::ai(vec![Content::tool_call(
            "t1",
            names::SEARCH,
            json!({"text": "rust", "search_type": 3}),
        )]));
        state.append(Message::tool_result(
            "t1",
            names::SEARCH,
            vec![Content::text(r#"[{"link":"https://chat/rust"},{"link":"https://chat/ferris"}]"#)],
            false,
        ));
        state.append(Message::ai_text("Found two chats."));
        state
    }

    #[test]
    fn test_buffer_string_format() {
        let text = buffer_string(conversation().messages());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Human: find chats about rust");
        assert!(lines[1].starts_with("AI: search_in_chats("));
        assert!(lines[1].contains("text=\"rust\""));
        assert!(lines[2].starts_with("Tool (search_in_chats): [{"));
        assert_eq!(lines[3], "AI: Found two chats.");
    }

    #[test]
    fn test_buffer_string_truncates_on_char_boundary() {
        let long = "ж".repeat(MAX_TOOL_RESULT_CHARS + 10);
        let msg = Message::tool_result("t", names::SEARCH, vec![Content::text(long)], true);
        let text = buffer_string(&[msg]);
        assert!(text.starts_with("Tool (search_in_chats error): "));
        assert!(text.ends_with("...(truncated)"));
    }

    #[test]
    fn test_should_summarize_threshold() {
        let state = conversation();
        assert!(should_summarize(&state, &SummarizerConfig { threshold: 4, max_tokens: 10 }));
        assert!(!should_summarize(&state, &SummarizerConfig { threshold: 5, max_tokens: 10 }));
        assert!(!should_summarize(
            &ConversationState::new(),
            &SummarizerConfig { threshold: 0, max_tokens: 10 }
        ));
    }

    #[tokio::test]
    async fn test_summarize_replaces_window_and_keeps_search_hits() {
        let mut state = conversation();
        let before: Vec<MessageId> = state.messages().iter().map(Message::id).collect();
        let transport =
            ScriptedTransport::new(vec![Message::ai_text("User searched for rust chats.")]);

        let outcome = summarize(
            &state,
            &SummarizerConfig::default(),
            &test_model(),
            &transport,
            &BuiltinPrompts,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        outcome.apply(&mut state);

        assert_eq!(state.summary.as_deref(), Some("User searched for rust chats."));
        assert!(state.messages().iter().all(|m| !before.contains(&m.id())));
        assert!(state.messages().is_empty());
        assert_eq!(
            links(&state.last_search_result),
            vec!["https://chat/rust", "https://chat/ferris"]
        );
        assert_eq!(links(&state.last_search_hits()), links(&state.last_search_result));
    }

    #[tokio::test]
    async fn test_summarize_does_not_bring_back_hits_cleared_by_reset() {
        let mut state = conversation();
        state.append(Message::human("start over"));
        state.append(Message::tool_result("r1", names::RESET, vec![Content::text("ok")], false));
        state.reset_bookkeeping();
        let transport = ScriptedTransport::new(vec![Message::ai_text("They started over.")]);

        let outcome = summarize(
            &state,
            &SummarizerConfig::default(),
            &test_model(),
            &transport,
            &BuiltinPrompts,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        outcome.apply(&mut state);

        assert!(state.last_search_result.is_empty());
        assert!(state.last_search_hits().is_empty());
    }

    #[tokio::test]
    async fn test_summarize_request_shape() {
        let state = conversation();
        let transport = ScriptedTransport::new(vec![Message::ai_text("s")]);
        summarize(
            &state,
            &SummarizerConfig::default(),
            &test_model(),
            &transport,
            &BuiltinPrompts,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let request = &transport.requests()[0];
        assert!(request.tool_names.is_empty());
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role(), "system");
        assert!(request.messages[0].text().starts_with("Human: find chats about rust"));
        assert_eq!(request.messages[1].text(), "Create a summary of the conversation above:");
    }

    #[tokio::test]
    async fn test_existing_summary_is_extended() {
        let mut state = conversation();
        state.summary = Some("Earlier they asked about Go.".into());
        let transport = ScriptedTransport::new(vec![Message::ai_text("Go, then Rust.")]);
        summarize(
            &state,
            &SummarizerConfig::default(),
            &test_model(),
            &transport,
            &BuiltinPrompts,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let instruction = transport.requests()[0].messages[1].text();
        let expected = "This is summary of the conversation to date: Earlier they asked about Go.";
        assert!(instruction.starts_with(expected));
        assert!(instruction.ends_with("new messages above:"));
    }

    #[tokio::test]
    async fn test_empty_summary_is_error_and_state_untouched() {
        let state = conversation();
        let transport = ScriptedTransport::new(vec![Message::ai_text("  ")]);
        let err = summarize(
            &state,
            &SummarizerConfig::default(),
            &test_model(),
            &transport,
            &BuiltinPrompts,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Summarization(_)));
        assert_eq!(state.messages().len(), 4);
    }
}
