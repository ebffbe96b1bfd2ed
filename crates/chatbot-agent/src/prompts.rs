//! Prompt selection and rendering
//!
//! Every prompt the bot sends is looked up through a [`PromptSelector`] by a
//! fixed [`PromptKey`]. [`BuiltinPrompts`] carries the defaults;
//! [`DirectoryPrompts`] lets an operator override any of them with a text file.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// The prompts the conversation machinery uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    /// System prompt of the agent step
    AgentSystem,
    /// Summarizer instruction when no summary exists yet. No variables.
    SummaryCreate,
    /// Summarizer instruction extending an existing summary. Uses `{summary}`.
    SummaryExtend,
    /// Context line giving the agent the running summary. Uses `{summary}`.
    SummaryContext,
    /// System prompt of the search scope classifier
    ClassifierSystem,
}

impl PromptKey {
    pub const ALL: [PromptKey; 5] = [
        PromptKey::AgentSystem,
        PromptKey::SummaryCreate,
        PromptKey::SummaryExtend,
        PromptKey::SummaryContext,
        PromptKey::ClassifierSystem,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptKey::AgentSystem => "agent.system",
            PromptKey::SummaryCreate => "summary.create",
            PromptKey::SummaryExtend => "summary.extend",
            PromptKey::SummaryContext => "summary.context",
            PromptKey::ClassifierSystem => "classifier.system",
        }
    }
}

static PLACEHOLDER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}"));

/// A prompt with `{name}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The raw template text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substitute every placeholder. A placeholder without a value is an error.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        let pattern = PLACEHOLDER
            .as_ref()
            .map_err(|e| Error::Prompt(e.to_string()))?;

        let mut missing = vec![];
        let rendered = pattern.replace_all(&self.text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match vars.iter().find(|(key, _)| *key == name) {
                Some((_, value)) => value.to_string(),
                None => {
                    missing.push(name.to_string());
                    caps[0].to_string()
                }
            }
        });

        if !missing.is_empty() {
            return Err(Error::Prompt(format!(
                "no value for placeholder(s): {}",
                missing.join(", ")
            )));
        }
        Ok(rendered.into_owned())
    }
}

/// Chooses the template for a prompt key
pub trait PromptSelector: Send + Sync {
    fn select(&self, key: PromptKey) -> Result<PromptTemplate>;
}

const AGENT_SYSTEM: &str = "\
You are a helpful assistant that finds conversations in a chat application.
Tools:
* reply: send a message to the user.
* classify_search_scope: work out whether the user wants public chats, their own chats or all chats. Call it before searching.
* search_in_chats: search chats for a text, using the scope from classify_search_scope.
* forward_search_results: send the last search results to the user with a short comment.
* reset_conversation: forget the summary, scope and cached results when the user asks to start over.
When search results are relevant, forward them instead of retyping them.
Keep answers short.";

const SUMMARY_CREATE: &str = "Create a summary of the conversation above:";

const SUMMARY_EXTEND: &str = "\
This is summary of the conversation to date: {summary}

Extend the summary by taking into account the new messages above:";

const SUMMARY_CONTEXT: &str = "Summary of conversation earlier: {summary}";

const CLASSIFIER_SYSTEM: &str = "\
As an expert in searching for information in chats, you follow a clear process to identify the target search area.
Depending on your answer, the search process runs through different subsets of chats, so the answer is critical.
There are three possible search areas:
* PUBLIC - search in the publicly available chats
* PRIVATE - search in the chats where the user is a member or owner
* GENERAL - search in all chats, both PUBLIC and PRIVATE
There is also one special value UNCERTAIN, when it is unclear from the user's message where to run next search.
Instructions:
* If the user says \"search all chats\" or \"search everywhere,\" the search area is GENERAL
* If the user requested to reset or start the search over, the search area is GENERAL
* If the user explicitly mentions \"public chats\" or similar, the search area is PUBLIC
* If the user refers to \"private chats\" or \"my chats\" or similar, the search area is PRIVATE
* In all other cases when user's message is unrelated to chats the search area is UNCERTAIN
Important:
* Every user message in the list redefines search area unless search area is UNCERTAIN.
* Return only one word in the output (PUBLIC, PRIVATE, GENERAL or UNCERTAIN).";

/// The prompts compiled into the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPrompts;

impl PromptSelector for BuiltinPrompts {
    fn select(&self, key: PromptKey) -> Result<PromptTemplate> {
        let text = match key {
            PromptKey::AgentSystem => AGENT_SYSTEM,
            PromptKey::SummaryCreate => SUMMARY_CREATE,
            PromptKey::SummaryExtend => SUMMARY_EXTEND,
            PromptKey::SummaryContext => SUMMARY_CONTEXT,
            PromptKey::ClassifierSystem => CLASSIFIER_SYSTEM,
        };
        Ok(PromptTemplate::new(text))
    }
}

/// Prompts read from `<dir>/<key>.txt`, falling back to the builtins.
///
/// Files are read on every selection, so edits apply to the next turn.
#[derive(Debug, Clone)]
pub struct DirectoryPrompts {
    dir: PathBuf,
}

impl DirectoryPrompts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: PromptKey) -> PathBuf {
        self.dir.join(format!("{}.txt", key.as_str()))
    }
}

impl PromptSelector for DirectoryPrompts {
    fn select(&self, key: PromptKey) -> Result<PromptTemplate> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "prompt override");
                Ok(PromptTemplate::new(text.trim_end()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BuiltinPrompts.select(key),
            Err(e) => Err(Error::Prompt(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Select and render a prompt in one step
pub fn render(
    selector: &dyn PromptSelector,
    key: PromptKey,
    vars: &[(&str, &str)],
) -> Result<String> {
    selector.select(key)?.render(vars)
}
