//! Conversation state: the message window, running summary and search bookkeeping.

use std::fmt;
use std::str::FromStr;

use chatbot_ai::{Message, MessageId};
use serde::{Deserialize, Serialize};

use crate::tool::names;

/// Which subset of chats a search runs against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchScope {
    /// Publicly available chats
    Public,
    /// Chats the user is a member or owner of
    Private,
    /// Every chat, public and private
    #[default]
    General,
    /// The classifier could not tell
    Uncertain,
}

impl SearchScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchScope::Public => "PUBLIC",
            SearchScope::Private => "PRIVATE",
            SearchScope::General => "GENERAL",
            SearchScope::Uncertain => "UNCERTAIN",
        }
    }

    /// Integer code the search backend expects. `Uncertain` searches everywhere.
    pub fn backend_code(self) -> u8 {
        match self {
            SearchScope::Public => 1,
            SearchScope::Private => 2,
            SearchScope::General | SearchScope::Uncertain => 3,
        }
    }

    pub fn is_concrete(self) -> bool {
        !matches!(self, SearchScope::Uncertain)
    }

    /// Parse classifier output, accepting only the three concrete scopes.
    pub fn parse_concrete(text: &str) -> Option<SearchScope> {
        text.trim()
            .parse::<SearchScope>()
            .ok()
            .filter(|scope| scope.is_concrete())
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLIC" => Ok(SearchScope::Public),
            "PRIVATE" => Ok(SearchScope::Private),
            "GENERAL" => Ok(SearchScope::General),
            "UNCERTAIN" => Ok(SearchScope::Uncertain),
            other => Err(format!("unknown search scope: {other}")),
        }
    }
}

/// One search result as returned by the backend.
///
/// Only `link` is interpreted; everything else rides along untouched so a
/// hit serializes back to the same JSON it was read from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SearchHit {
    pub fn with_link(link: impl Into<String>) -> Self {
        Self {
            link: Some(link.into()),
            extra: serde_json::Map::new(),
        }
    }
}

/// Parse a search tool result body into hits.
pub fn parse_hits(text: &str) -> Result<Vec<SearchHit>, serde_json::Error> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }
    serde_json::from_str(text)
}

/// Links of the hits that have one, in order.
pub fn links(hits: &[SearchHit]) -> Vec<String> {
    hits.iter().filter_map(|hit| hit.link.clone()).collect()
}

/// An edit to the message window.
#[derive(Debug, Clone)]
pub enum MessageOp {
    /// Append a message, stamping it with the next id
    Append(Message),
    /// Remove the message with this id, if present
    Remove(MessageId),
}

/// State of one conversation thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// Running summary of messages no longer in the window
    pub summary: Option<String>,
    /// Scope the next search should use
    pub search_scope: SearchScope,
    /// Hits of the last search, kept after the window is summarized away
    pub last_search_result: Vec<SearchHit>,
    last_seen_message_id: MessageId,
    next_id: MessageId,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live message window, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Newest message id already folded into the bookkeeping fields
    pub fn last_seen_message_id(&self) -> MessageId {
        self.last_seen_message_id
    }

    /// Move the last-seen marker forward. Older ids are ignored.
    pub fn advance_last_seen(&mut self, id: MessageId) {
        if id > self.last_seen_message_id {
            self.last_seen_message_id = id;
        }
    }

    /// Apply one edit to the message window.
    ///
    /// Appending first retracts a trailing empty AI message. Returns the id
    /// of the appended message.
    pub fn apply(&mut self, op: MessageOp) -> Option<MessageId> {
        match op {
            MessageOp::Append(mut message) => {
                if self.messages.last().is_some_and(Message::is_empty_ai) {
                    let retracted = self.messages.pop();
                    tracing::debug!(
                        id = ?retracted.map(|m| m.id()),
                        "retracted empty AI message"
                    );
                }
                self.next_id = self.next_id.max(self.max_id()).next();
                message.set_id(self.next_id);
                self.messages.push(message);
                Some(self.next_id)
            }
            MessageOp::Remove(id) => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id() != id);
                if self.messages.len() == before {
                    tracing::debug!(%id, "remove of unknown message id ignored");
                }
                None
            }
        }
    }

    pub fn append(&mut self, message: Message) -> MessageId {
        let id = self.apply(MessageOp::Append(message));
        id.unwrap_or(self.next_id)
    }

    /// Remove every message whose id is listed.
    pub fn remove_all(&mut self, ids: &[MessageId]) {
        for id in ids {
            self.apply(MessageOp::Remove(*id));
        }
    }

    fn max_id(&self) -> MessageId {
        self.messages
            .iter()
            .map(Message::id)
            .max()
            .unwrap_or_default()
    }

    /// Hits forward_search_results should use.
    ///
    /// The newest search result in the window wins: a successful one is
    /// parsed, a failed one means there is nothing to forward. A successful
    /// reset newer than any search also leaves nothing. Without either in the
    /// window the cached `last_search_result` is used.
    pub fn last_search_hits(&self) -> Vec<SearchHit> {
        let newest = self.messages.iter().rev().find(|m| {
            m.tool_name() == Some(names::SEARCH) || m.is_successful_result_of(names::RESET)
        });

        let Some(message) = newest else {
            return self.last_search_result.clone();
        };
        if !message.is_successful_result_of(names::SEARCH) {
            return vec![];
        }
        match parse_hits(&message.text()) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(
                    id = %message.id(),
                    "malformed search result, treating as empty: {}",
                    e
                );
                vec![]
            }
        }
    }

    /// Clear what "start over" clears: summary, scope and cached search hits.
    pub fn reset_bookkeeping(&mut self) {
        self.summary = None;
        self.search_scope = SearchScope::default();
        self.last_search_result.clear();
    }

    /// Forget everything, including the last-seen marker.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
