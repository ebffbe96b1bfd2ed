//! chatbot-ai: LLM message types and provider access for the chat bot
//!
//! This crate owns the conversation message model shared by every other
//! crate in the workspace, and the streaming Anthropic Messages client the
//! agent talks to.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
