//! Search scope classification
//!
//! The classifier replays the user's messages since the last successful
//! classification through a tool-free model call, one message at a time,
//! oldest first. Each concrete answer replaces the running scope; anything
//! else (including `UNCERTAIN`) leaves it as it was.

use std::sync::Arc;

use chatbot_ai::{Message, Model};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::prompts::{PromptKey, PromptSelector};
use crate::state::{ConversationState, SearchScope};
use crate::tool::names;
use crate::transport::{RunConfig, Transport, complete};

/// Where a classification run starts from
#[derive(Debug, Clone)]
pub struct ClassificationBatch {
    /// Scope in force before the batch
    pub start: SearchScope,
    /// Human messages to classify, oldest first
    pub messages: Vec<Message>,
}

/// Collect the human messages that have not been classified yet.
///
/// History is scanned newest first and stops at the most recent successful
/// classification, whose answer becomes the starting scope. A successful
/// reset also ends the scan and starts from the default scope. Without
/// either, the state's current scope is the start.
pub fn pending_batch(state: &ConversationState) -> ClassificationBatch {
    let mut stack = vec![];
    let mut start = None;

    for message in state.messages().iter().rev() {
        if message.is_human() {
            stack.push(message.clone());
        } else if message.is_successful_result_of(names::CLASSIFY) {
            let scope = SearchScope::parse_concrete(&message.text());
            start = Some(scope.unwrap_or(state.search_scope));
            break;
        } else if message.is_successful_result_of(names::RESET) {
            start = Some(SearchScope::default());
            break;
        }
    }

    stack.reverse();
    let start = start.unwrap_or(state.search_scope);
    ClassificationBatch {
        start: if start.is_concrete() { start } else { SearchScope::default() },
        messages: stack,
    }
}

/// Classifies search scope with a dedicated tool-free model call
pub struct SearchScopeClassifier {
    transport: Arc<dyn Transport>,
    model: Model,
    prompts: Arc<dyn PromptSelector>,
}

impl SearchScopeClassifier {
    pub fn new(
        transport: Arc<dyn Transport>,
        model: Model,
        prompts: Arc<dyn PromptSelector>,
    ) -> Self {
        Self {
            transport,
            model,
            prompts,
        }
    }

    /// Classify one message. `None` means the model did not give a concrete scope.
    pub async fn classify_message(
        &self,
        message: &Message,
        cancel: CancellationToken,
    ) -> Result<Option<SearchScope>> {
        let system = self.prompts.select(PromptKey::ClassifierSystem)?.text().to_string();
        let mut config = RunConfig::plain(self.model.clone(), Some(system));
        config.max_tokens = Some(16);
        config.temperature = Some(0.0);

        let response = complete(self.transport.as_ref(), vec![message.clone()], &config, cancel)
            .await
            .map_err(|e| Error::Classification(e.to_string()))?;
        let answer = response.text();
        let scope = SearchScope::parse_concrete(&answer);
        tracing::debug!(
            input = %message.text(),
            answer = %answer.trim(),
            ?scope,
            "classified message"
        );
        Ok(scope)
    }

    /// Work out the scope the conversation is asking for now.
    pub async fn classify(
        &self,
        state: &ConversationState,
        cancel: CancellationToken,
    ) -> Result<SearchScope> {
        let batch = pending_batch(state);
        let mut scope = batch.start;

        for message in &batch.messages {
            if let Some(next) = self.classify_message(message, cancel.clone()).await? {
                scope = next;
            }
        }
        Ok(scope)
    }
}
