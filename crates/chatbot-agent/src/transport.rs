//! Transport abstraction for model calls

use std::{pin::Pin, sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use chatbot_ai::{
    Context, Message, Model, Result, StreamOptions, Usage,
    providers::LlmProvider,
    stream::{MessageEvent, PartialMessage},
};
use futures::StreamExt;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if an error is retryable
fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    ["429", "rate limit", "timeout", "connection", "overloaded", "500", "502", "503", "504"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Configuration for one model call
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Available tools (as API definitions); empty for tool-free calls
    pub tools: Vec<chatbot_ai::Tool>,
    /// Model to use
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Temperature
    pub temperature: Option<f32>,
}

impl RunConfig {
    /// A tool-free call with the given system prompt
    pub fn plain(model: Model, system_prompt: Option<String>) -> Self {
        Self {
            system_prompt,
            tools: vec![],
            model,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// A stream of agent events
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Transport for model calls
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one model call over `messages`, streaming events
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<AgentEventStream>;
}

/// Direct provider transport - calls the LLM API
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    /// Create a transport over any provider
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<AgentEventStream> {
        let context = Context {
            system_prompt: config.system_prompt.clone(),
            messages,
            tools: config.tools.clone(),
        };
        let options = StreamOptions {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop_sequences: vec![],
        };

        let model = config.model.clone();
        let provider = self.provider.clone();
        let retry_config = self.retry_config.clone();

        let event_stream: AgentEventStream = Box::pin(stream! {
            let mut attempt = 0u32;
            let message_stream;

            loop {
                if cancel.is_cancelled() {
                    yield AgentEvent::Error { message: "Cancelled".to_string() };
                    return;
                }

                match provider.stream(&model, &context, &options).await {
                    Ok(s) => {
                        message_stream = s;
                        break;
                    }
                    Err(e) => {
                        let error_msg = e.to_string();
                        let retryable = e.is_retryable() || is_retryable_error(&error_msg);

                        if attempt < retry_config.max_retries && retryable {
                            let delay = retry_config.delay_for_attempt(attempt);
                            tracing::warn!(
                                "Model request failed (attempt {}/{}): {}. Retrying in {:?}...",
                                attempt + 1,
                                retry_config.max_retries + 1,
                                error_msg,
                                delay
                            );
                            attempt += 1;
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = cancel.cancelled() => {}
                            }
                            continue;
                        }

                        yield AgentEvent::Error { message: error_msg };
                        return;
                    }
                }
            }

            let mut message_stream = message_stream;
            let mut partial = PartialMessage::new();

            while let Some(event) = message_stream.next().await {
                if cancel.is_cancelled() {
                    yield AgentEvent::Error { message: "Cancelled".to_string() };
                    return;
                }

                partial.apply(&event);

                match event {
                    MessageEvent::Start { message } => {
                        yield AgentEvent::MessageStart { message };
                    }
                    MessageEvent::TextDelta { .. } | MessageEvent::ToolCallDelta { .. } => {
                        yield AgentEvent::MessageUpdate {
                            message: Message::ai(partial.content()),
                        };
                    }
                    MessageEvent::Done { message, usage, .. } => {
                        yield AgentEvent::MessageEnd { message: message.clone() };
                        yield AgentEvent::ResponseEnd { message, usage };
                        return;
                    }
                    MessageEvent::Error { message } => {
                        yield AgentEvent::Error { message };
                        return;
                    }
                    _ => {}
                }
            }
        });

        Ok(event_stream)
    }
}

/// What one drained model call produced
#[derive(Debug, Default)]
pub struct Completion {
    /// The finished response, if the stream produced one
    pub message: Option<Message>,
    pub usage: Usage,
}

/// Consume an event stream, handing every event to `on_event`.
///
/// Returns the stream's error message if it reported one.
pub async fn drain(
    event_stream: &mut AgentEventStream,
    mut on_event: impl FnMut(&AgentEvent),
) -> std::result::Result<Completion, String> {
    let mut completion = Completion::default();

    while let Some(event) = event_stream.next().await {
        on_event(&event);
        match event {
            AgentEvent::MessageEnd { message } => completion.message = Some(message),
            AgentEvent::ResponseEnd { usage, .. } => completion.usage = usage,
            AgentEvent::Error { message } => return Err(message),
            _ => {}
        }
    }

    Ok(completion)
}

/// Make a tool-free model call and return its response.
pub async fn complete(
    transport: &dyn Transport,
    messages: Vec<Message>,
    config: &RunConfig,
    cancel: CancellationToken,
) -> crate::error::Result<Message> {
    let mut event_stream = transport.run(messages, config, cancel).await?;
    let completion = drain(&mut event_stream, |_| {})
        .await
        .map_err(crate::error::Error::Model)?;
    completion
        .message
        .ok_or_else(|| crate::error::Error::Model("stream ended without a response".into()))
}
