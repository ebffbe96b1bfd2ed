//! Anthropic Claude API provider

use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{
        AiMetadata, Content, Context, Message, MessageId, Model, StopReason, StreamOptions, Tool,
        Usage,
    },
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmProvider;

const API_VERSION: &str = "2023-06-01";

/// Anthropic API client
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn headers(&self, model: &Model) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| Error::InvalidHeader {
                name: "x-api-key".into(),
                reason: "API key contains characters not allowed in a header".into(),
            })?;
        headers.insert("x-api-key", api_key);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            "anthropic-beta",
            HeaderValue::from_static("fine-grained-tool-streaming-2025-05-14"),
        );
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        for (key, value) in &model.headers {
            let name = key
                .parse::<HeaderName>()
                .map_err(|e| Error::InvalidHeader {
                    name: key.clone(),
                    reason: e.to_string(),
                })?;
            let val = value
                .parse::<HeaderValue>()
                .map_err(|e| Error::InvalidHeader {
                    name: key.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(name, val);
        }
        Ok(headers)
    }

    fn build_request(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> AnthropicRequest {
        let (inline_system, messages) = convert_messages(&context.messages);
        let tools = if context.tools.is_empty() {
            None
        } else {
            Some(convert_tools(&context.tools))
        };

        let system_text: Vec<String> = context
            .system_prompt
            .iter()
            .cloned()
            .chain(inline_system)
            .filter(|s| !s.is_empty())
            .collect();
        let system = if system_text.is_empty() {
            None
        } else {
            Some(vec![SystemBlock {
                block_type: "text".to_string(),
                text: system_text.join("\n\n"),
            }])
        };

        AnthropicRequest {
            model: model.id.clone(),
            messages,
            max_tokens: options.max_tokens.unwrap_or(model.max_tokens),
            stream: true,
            system,
            temperature: options.temperature,
            stop_sequences: if options.stop_sequences.is_empty() {
                None
            } else {
                Some(options.stop_sequences.clone())
            },
            tools,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        let request = self.build_request(model, context, options);
        let url = format!("{}/v1/messages", model.base_url.trim_end_matches('/'));

        tracing::debug!(
            %url,
            model = %model.id,
            messages = request.messages.len(),
            "anthropic request"
        );

        let request_builder = self
            .client
            .post(&url)
            .headers(self.headers(model)?)
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

/// Create the event stream from SSE events
fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut usage = Usage::default();
        let mut stop_reason = StopReason::Stop;
        let mut content_blocks: Vec<ContentBlock> = vec![];
        let mut error_message: Option<String> = None;

        yield MessageEvent::Start {
            message: Message::ai_empty(),
        };

        while let Some(event_result) = event_source.next().await {
            match event_result {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => match message.event.as_str() {
                    "message_start" => {
                        if let Ok(data) = serde_json::from_str::<MessageStartEvent>(&message.data) {
                            usage.input = data.message.usage.input_tokens;
                            usage.output = data.message.usage.output_tokens;
                            usage.cache_read = data.message.usage.cache_read_input_tokens.unwrap_or(0);
                            usage.cache_write = data.message.usage.cache_creation_input_tokens.unwrap_or(0);
                        }
                    }
                    "content_block_start" => {
                        let Ok(data) = serde_json::from_str::<ContentBlockStartEvent>(&message.data) else {
                            continue;
                        };
                        let index = data.index as usize;
                        while content_blocks.len() <= index {
                            content_blocks.push(ContentBlock::default());
                        }

                        match data.content_block.block_type.as_str() {
                            "text" => {
                                content_blocks[index] = ContentBlock::Text {
                                    text: data.content_block.text.unwrap_or_default(),
                                };
                                yield MessageEvent::TextStart { content_index: index };
                            }
                            "tool_use" => {
                                let id = data.content_block.id.unwrap_or_default();
                                let name = data.content_block.name.unwrap_or_default();
                                content_blocks[index] = ContentBlock::ToolCall {
                                    id: id.clone(),
                                    name: name.clone(),
                                    arguments_json: String::new(),
                                };
                                yield MessageEvent::ToolCallStart {
                                    content_index: index,
                                    id,
                                    name,
                                };
                            }
                            other => {
                                tracing::debug!(kind = other, "unsupported content block");
                                content_blocks[index] = ContentBlock::Unsupported {
                                    kind: other.to_string(),
                                };
                                yield MessageEvent::UnsupportedBlock {
                                    content_index: index,
                                    kind: other.to_string(),
                                };
                            }
                        }
                    }
                    "content_block_delta" => {
                        let Ok(data) = serde_json::from_str::<ContentBlockDeltaEvent>(&message.data) else {
                            continue;
                        };
                        let index = data.index as usize;
                        match (content_blocks.get_mut(index), data.delta.delta_type.as_str()) {
                            (Some(ContentBlock::Text { text }), "text_delta") => {
                                let delta = data.delta.text.unwrap_or_default();
                                text.push_str(&delta);
                                yield MessageEvent::TextDelta {
                                    content_index: index,
                                    delta,
                                };
                            }
                            (Some(ContentBlock::ToolCall { arguments_json, .. }), "input_json_delta") => {
                                let delta = data.delta.partial_json.unwrap_or_default();
                                arguments_json.push_str(&delta);
                                yield MessageEvent::ToolCallDelta {
                                    content_index: index,
                                    delta,
                                };
                            }
                            _ => {}
                        }
                    }
                    "content_block_stop" => {
                        let Ok(data) = serde_json::from_str::<ContentBlockStopEvent>(&message.data) else {
                            continue;
                        };
                        let index = data.index as usize;
                        match content_blocks.get(index) {
                            Some(ContentBlock::Text { text }) => {
                                yield MessageEvent::TextEnd {
                                    content_index: index,
                                    text: text.clone(),
                                };
                            }
                            Some(ContentBlock::ToolCall { id, name, arguments_json }) => {
                                yield MessageEvent::ToolCallEnd {
                                    content_index: index,
                                    id: id.clone(),
                                    name: name.clone(),
                                    arguments: parse_arguments(arguments_json),
                                };
                            }
                            _ => {}
                        }
                    }
                    "message_delta" => {
                        if let Ok(data) = serde_json::from_str::<MessageDeltaEvent>(&message.data) {
                            if let Some(reason) = data.delta.stop_reason {
                                stop_reason = map_stop_reason(&reason);
                            }
                            usage.output = data.usage.output_tokens;
                        }
                    }
                    "message_stop" => break,
                    "error" => {
                        if let Ok(data) = serde_json::from_str::<ErrorEvent>(&message.data) {
                            error_message = Some(format!("{}: {}", data.error.error_type, data.error.message));
                            stop_reason = StopReason::Error;
                        }
                        break;
                    }
                    _ => {}
                },
                Err(e) => {
                    error_message = Some(e.to_string());
                    stop_reason = StopReason::Error;
                    break;
                }
            }
        }
        event_source.close();

        if let Some(error_msg) = error_message {
            yield MessageEvent::Error { message: error_msg };
            return;
        }

        let content: Vec<Content> = content_blocks
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(Content::Text { text }),
                ContentBlock::ToolCall { id, name, arguments_json } => Some(Content::ToolCall {
                    id,
                    name,
                    arguments: parse_arguments(&arguments_json),
                }),
                ContentBlock::Unsupported { kind } => Some(Content::Unsupported { kind }),
                ContentBlock::Empty => None,
            })
            .collect();

        let final_message = Message::Ai {
            id: MessageId::PENDING,
            content,
            metadata: AiMetadata {
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason: Some(stop_reason),
                error_message: None,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };

        yield MessageEvent::Done {
            message: final_message,
            stop_reason,
            usage,
        };
    }
}

/// Tool input arrives as concatenated JSON fragments; an empty buffer is `{}`.
fn parse_arguments(arguments_json: &str) -> serde_json::Value {
    if arguments_json.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(arguments_json).unwrap_or(serde_json::Value::Null)
}

// ============================================================================
// Internal types for content block tracking
// ============================================================================

#[derive(Debug, Default)]
enum ContentBlock {
    #[default]
    Empty,
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
    Unsupported {
        kind: String,
    },
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// ============================================================================
// Response event types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStartEvent {
    index: u32,
    content_block: ContentBlockInfo,
}

#[derive(Debug, Deserialize)]
struct ContentBlockInfo {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    index: u32,
    delta: DeltaInfo,
}

#[derive(Debug, Deserialize)]
struct DeltaInfo {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStopEvent {
    index: u32,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

// ============================================================================
// Conversion functions
// ============================================================================

/// Split bot messages into inline system text and API turns.
///
/// System messages are lifted into the request's `system` field. Consecutive
/// turns with the same API role are merged, so a run of tool results lands
/// in one user turn.
fn convert_messages(messages: &[Message]) -> (Vec<String>, Vec<AnthropicMessage>) {
    let mut system = vec![];
    let mut result: Vec<AnthropicMessage> = vec![];

    for message in messages {
        let (role, blocks) = match message {
            Message::System { .. } => {
                system.push(message.text());
                continue;
            }
            Message::Human { content, .. } => (
                "user",
                content
                    .iter()
                    .filter_map(|c| c.as_text())
                    .map(|text| serde_json::json!({ "type": "text", "text": text }))
                    .collect::<Vec<_>>(),
            ),
            Message::Ai { content, .. } => (
                "assistant",
                content
                    .iter()
                    .filter_map(|c| match c {
                        Content::Text { text } if !text.is_empty() => {
                            Some(serde_json::json!({ "type": "text", "text": text }))
                        }
                        Content::ToolCall {
                            id,
                            name,
                            arguments,
                        } => Some(serde_json::json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": arguments
                        })),
                        _ => None,
                    })
                    .collect(),
            ),
            Message::Tool {
                tool_call_id,
                is_error,
                ..
            } => (
                "user",
                vec![serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": message.text(),
                    "is_error": is_error
                })],
            ),
        };

        if blocks.is_empty() {
            continue;
        }
        match result.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => result.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    (system, result)
}

fn convert_tools(tools: &[Tool]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| {
            let input_schema = if tool.parameters.is_object() {
                let mut schema = tool.parameters.clone();
                if let Some(obj) = schema.as_object_mut() {
                    obj.entry("type").or_insert(serde_json::json!("object"));
                }
                schema
            } else {
                serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                })
            };

            AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema,
            }
        })
        .collect()
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::Length,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_are_lifted() {
        let messages = vec![
            Message::system("Summary of conversation earlier: they like rust"),
            Message::human("hello"),
        ];
        let (system, turns) = convert_messages(&messages);
        assert_eq!(system, vec!["Summary of conversation earlier: they like rust"]);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "user");
    }

    #[test]
    fn test_consecutive_tool_results_share_a_turn() {
        let messages = vec![
            Message::human("find rust chats"),
            Message::ai(vec![
                Content::tool_call("t1", "classify_search_scope", serde_json::json!({})),
                Content::tool_call("t2", "search_in_chats", serde_json::json!({"text": "rust"})),
            ]),
            Message::tool_result(
                "t1",
                "classify_search_scope",
                vec![Content::text("PUBLIC")],
                false,
            ),
            Message::tool_result("t2", "search_in_chats", vec![Content::text("[]")], false),
        ];
        let (_, turns) = convert_messages(&messages);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].role, "user");
        assert_eq!(turns[2].content.len(), 2);
        assert_eq!(turns[2].content[1]["tool_use_id"], "t2");
    }

    #[test]
    fn test_empty_ai_turn_is_dropped() {
        let messages = vec![Message::human("hi"), Message::ai_empty(), Message::human("again")];
        let (_, turns) = convert_messages(&messages);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content.len(), 2);
    }

    #[test]
    fn test_unsupported_blocks_are_not_sent() {
        let messages = vec![Message::ai(vec![
            Content::Unsupported { kind: "thinking".into() },
            Content::text("answer"),
        ])];
        let (_, turns) = convert_messages(&messages);
        assert_eq!(turns[0].content.len(), 1);
        assert_eq!(turns[0].content[0]["text"], "answer");
    }

    #[test]
    fn test_request_merges_system_prompt_and_inline_system() {
        let provider = AnthropicProvider::new("sk-test");
        let context = Context {
            system_prompt: Some("You are a chat search assistant.".into()),
            messages: vec![
                Message::system("Summary of conversation earlier: none"),
                Message::human("hi"),
            ],
            tools: vec![],
        };

        let request = provider.build_request(
            &Model::anthropic("claude-3-haiku-20240307"),
            &context,
            &StreamOptions::default(),
        );
        let system = request.system.unwrap();
        assert_eq!(
            system[0].text,
            "You are a chat search assistant.\n\nSummary of conversation earlier: none"
        );
        assert!(request.tools.is_none());
        assert_eq!(request.max_tokens, 4096);
    }

    #[test]
    fn test_convert_tools_defaults_object_type() {
        let tools = vec![Tool::new(
            "reply",
            "Send a message",
            serde_json::json!({"properties": {}}),
        )];
        let converted = convert_tools(&tools);
        assert_eq!(converted[0].input_schema["type"], "object");
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#), serde_json::json!({"a": 1}));
        assert_eq!(parse_arguments("{broken"), serde_json::Value::Null);
    }

    #[test]
    fn test_map_stop_reason() {
        assert_eq!(map_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(map_stop_reason("max_tokens"), StopReason::Length);
        assert_eq!(map_stop_reason("end_turn"), StopReason::Stop);
    }

    #[test]
    fn test_bad_model_header_is_rejected() {
        let provider = AnthropicProvider::new("sk-test");
        let mut model = Model::anthropic("claude-3-haiku-20240307");
        model.headers.insert("bad header".into(), "x".into());
        assert!(matches!(provider.headers(&model), Err(Error::InvalidHeader { .. })));
    }
}
