//! LLM Provider implementations

pub mod anthropic;

use crate::{Context, Error, MessageEventStream, Model, Result, StreamOptions};
use async_trait::async_trait;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the LLM
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream>;
}

/// Get an API key from the provided value, or the first set environment variable
pub fn get_api_key(provided: Option<&str>, env_vars: &[&str]) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    env_vars
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .ok_or_else(|| Error::MissingApiKey(env_vars.iter().map(|v| v.to_string()).collect()))
}
