//! Folds tool results back into the bookkeeping fields of the state.

use chatbot_ai::Message;

use crate::state::{ConversationState, SearchScope, parse_hits};
use crate::tool::names;

/// What one updater pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    /// Tool messages looked at
    pub processed: usize,
    /// New scope, if a classification set one
    pub scope: Option<SearchScope>,
    /// Whether `last_search_result` was refreshed
    pub search_refreshed: bool,
    /// Whether a reset cleared the bookkeeping
    pub reset: bool,
}

/// Process every tool message newer than `last_seen_message_id`, oldest first,
/// then move `last_seen_message_id` to the newest message in the window.
pub fn update_state(state: &mut ConversationState) -> StateUpdate {
    let last_seen = state.last_seen_message_id();
    let unseen: Vec<Message> = state
        .messages()
        .iter()
        .filter(|m| m.id() > last_seen && m.tool_name().is_some())
        .cloned()
        .collect();

    let mut update = StateUpdate::default();
    for message in &unseen {
        update.processed += 1;
        apply_tool_message(state, message, &mut update);
    }

    if let Some(newest) = state.last_message().map(Message::id) {
        state.advance_last_seen(newest);
    }
    update
}

fn apply_tool_message(state: &mut ConversationState, message: &Message, update: &mut StateUpdate) {
    match message.tool_name() {
        Some(names::CLASSIFY) if message.is_successful_result_of(names::CLASSIFY) => {
            match SearchScope::parse_concrete(&message.text()) {
                Some(scope) => {
                    state.search_scope = scope;
                    update.scope = Some(scope);
                }
                None => {
                    tracing::debug!(text = %message.text(), "classification left scope unchanged")
                }
            }
        }
        Some(names::SEARCH) => {
            state.last_search_result = if message.is_successful_result_of(names::SEARCH) {
                parse_hits(&message.text()).unwrap_or_else(|e| {
                    tracing::warn!(
                        id = %message.id(),
                        "malformed search result, caching nothing: {}",
                        e
                    );
                    vec![]
                })
            } else {
                vec![]
            };
            update.search_refreshed = true;
        }
        Some(names::RESET) if message.is_successful_result_of(names::RESET) => {
            state.reset_bookkeeping();
            update.scope = Some(state.search_scope);
            update.reset = true;
        }
        _ => {}
    }
}
