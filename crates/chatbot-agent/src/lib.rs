//! chatbot-agent: the conversation state machine behind the chat bot
//!
//! A [`ChatGraph`] takes one user message per turn, lets the model call the
//! registered tools, folds their results into the [`ConversationState`],
//! answers through the reply tool, summarizes long threads and suspends
//! until the next message.

pub mod classifier;
pub mod error;
pub mod events;
pub mod graph;
pub mod prompts;
pub mod state;
pub mod store;
pub mod summarizer;
pub mod tool;
pub mod transport;
pub mod updater;

#[cfg(test)]
mod testing;

pub use classifier::SearchScopeClassifier;
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use graph::{ChatGraph, GraphConfig, Step, TurnOutcome};
pub use prompts::{BuiltinPrompts, DirectoryPrompts, PromptKey, PromptSelector};
pub use state::{ConversationState, SearchHit, SearchScope};
pub use store::{Checkpoint, CheckpointStore, InMemoryStore, StoreConfig, ThreadStatus};
pub use summarizer::SummarizerConfig;
pub use tool::{BoxedTool, Tool, ToolContext, ToolError, ToolResult};
pub use transport::{ProviderTransport, RetryConfig, Transport};
