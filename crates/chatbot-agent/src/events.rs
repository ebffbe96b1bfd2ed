//! Agent event types

use chatbot_ai::{Message, MessageId, Usage};
use serde::{Deserialize, Serialize};

use crate::graph::Step;
use crate::state::SearchScope;

/// Events emitted while a conversation turn runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A user message was accepted for a thread
    TurnStart { thread_id: String },

    /// The state machine entered a step
    StepStart { step: Step },

    /// Model response streaming started
    MessageStart { message: Message },

    /// Model response content updated during streaming
    MessageUpdate { message: Message },

    /// Model response completed
    MessageEnd { message: Message },

    /// The transport finished one model call
    ResponseEnd { message: Message, usage: Usage },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// Tool results were folded into the bookkeeping fields
    StateUpdated {
        search_scope: SearchScope,
        last_seen_message_id: MessageId,
    },

    /// Summarization started
    SummarizationStart { message_count: usize },

    /// Summarization completed
    SummarizationEnd { removed: usize },

    /// The thread is waiting for the next user message
    Suspended {
        thread_id: String,
        steps: u32,
        usage: Usage,
    },

    /// Error occurred
    Error { message: String },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Suspended { .. } | AgentEvent::Error { .. })
    }
}
