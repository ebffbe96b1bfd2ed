//! Provider stream events and the partial response they build up

use crate::types::{Content, Message, StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// One event of a streamed model response.
///
/// Blocks are addressed by `content_index`, the position of the block in
/// the finished message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    Start { message: Message },
    TextStart { content_index: usize },
    TextDelta { content_index: usize, delta: String },
    TextEnd { content_index: usize, text: String },
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// A fragment of the tool call's JSON arguments
    ToolCallDelta { content_index: usize, delta: String },
    ToolCallEnd {
        content_index: usize,
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// A block the bot does not interpret, such as thinking
    UnsupportedBlock { content_index: usize, kind: String },
    /// The response is complete; `message` is final
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    Error { message: String },
}

pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

#[derive(Debug)]
enum Block {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        /// Raw argument JSON; incomplete until the call ends
        json: String,
    },
    Unsupported(String),
}

impl Block {
    fn content(&self) -> Content {
        match self {
            Block::Text(text) => Content::text(text.as_str()),
            // Half-streamed arguments do not parse yet and show as null.
            Block::ToolCall { id, name, json } => Content::tool_call(
                id.as_str(),
                name.as_str(),
                serde_json::from_str(json).unwrap_or(serde_json::Value::Null),
            ),
            Block::Unsupported(kind) => Content::Unsupported { kind: kind.clone() },
        }
    }
}

/// The response so far, for progress updates while a stream is running
#[derive(Debug, Default)]
pub struct PartialMessage {
    blocks: Vec<Block>,
}

impl PartialMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::TextStart { content_index } => {
                self.put(*content_index, Block::Text(String::new()));
            }
            MessageEvent::TextDelta {
                content_index,
                delta,
            } => {
                if let Some(Block::Text(text)) = self.blocks.get_mut(*content_index) {
                    text.push_str(delta);
                }
            }
            MessageEvent::TextEnd {
                content_index,
                text,
            } => self.put(*content_index, Block::Text(text.clone())),
            MessageEvent::ToolCallStart {
                content_index,
                id,
                name,
            } => self.put(
                *content_index,
                Block::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    json: String::new(),
                },
            ),
            MessageEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                if let Some(Block::ToolCall { json, .. }) = self.blocks.get_mut(*content_index) {
                    json.push_str(delta);
                }
            }
            MessageEvent::ToolCallEnd {
                content_index,
                id,
                name,
                arguments,
            } => self.put(
                *content_index,
                Block::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    json: arguments.to_string(),
                },
            ),
            MessageEvent::UnsupportedBlock {
                content_index,
                kind,
            } => self.put(*content_index, Block::Unsupported(kind.clone())),
            MessageEvent::Start { .. }
            | MessageEvent::Done { .. }
            | MessageEvent::Error { .. } => {}
        }
    }

    pub fn content(&self) -> Vec<Content> {
        self.blocks.iter().map(Block::content).collect()
    }

    /// Place `block` at `index`, padding any gap with empty text.
    fn put(&mut self, index: usize, block: Block) {
        if self.blocks.len() <= index {
            self.blocks.resize_with(index + 1, || Block::Text(String::new()));
        }
        self.blocks[index] = block;
    }
}
