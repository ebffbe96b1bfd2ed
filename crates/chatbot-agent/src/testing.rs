//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chatbot_ai::{Message, Model, Usage};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;
use crate::transport::{AgentEventStream, RunConfig, Transport};

pub(crate) fn test_model() -> Model {
    let mut model = Model::anthropic("test");
    model.base_url = "http://localhost".into();
    model
}

/// What a transport was asked to do
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tool_names: Vec<String>,
}

fn respond(msg: Message) -> AgentEventStream {
    Box::pin(async_stream::stream! {
        yield AgentEvent::MessageStart { message: Message::ai_empty() };
        yield AgentEvent::MessageEnd { message: msg.clone() };
        yield AgentEvent::ResponseEnd { message: msg, usage: Usage::default() };
    })
}

fn record(requests: &Mutex<Vec<Recorded>>, messages: Vec<Message>, config: &RunConfig) {
    requests.lock().push(Recorded {
        messages,
        system_prompt: config.system_prompt.clone(),
        tool_names: config.tools.iter().map(|t| t.name.clone()).collect(),
    });
}

/// A transport that answers with canned responses in order.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Message>>,
    error: Option<String>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            error: None,
            requests: Mutex::new(vec![]),
        }
    }

    /// Every call reports `message` as a stream error
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        _cancel: CancellationToken,
    ) -> chatbot_ai::Result<AgentEventStream> {
        record(&self.requests, messages, config);

        if let Some(message) = self.error.clone() {
            return Ok(Box::pin(async_stream::stream! {
                yield AgentEvent::Error { message };
            }));
        }

        let msg = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Message::ai_text("done"));
        Ok(respond(msg))
    }
}

/// A transport that computes each answer from the last message it is given.
pub(crate) struct FnTransport {
    responder: Box<dyn Fn(&Message) -> String + Send + Sync>,
    calls: AtomicUsize,
}

impl FnTransport {
    pub fn new(responder: impl Fn(&Message) -> String + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FnTransport {
    async fn run(
        &self,
        messages: Vec<Message>,
        _config: &RunConfig,
        _cancel: CancellationToken,
    ) -> chatbot_ai::Result<AgentEventStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = messages
            .last()
            .map(|m| (self.responder)(m))
            .unwrap_or_default();
        Ok(respond(Message::ai_text(text)))
    }
}
