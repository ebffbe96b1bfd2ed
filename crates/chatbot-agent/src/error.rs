//! Error types for chatbot-agent

use thiserror::Error;

/// Result type alias using chatbot-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the AI provider layer
    #[error(transparent)]
    Ai(#[from] chatbot_ai::Error),

    /// The model stream reported an error or ended without a response
    #[error("Model call failed: {0}")]
    Model(String),

    /// Summarizing the conversation failed
    #[error("Summarization error: {0}")]
    Summarization(String),

    /// Classifying the search scope failed
    #[error("Classification error: {0}")]
    Classification(String),

    /// A tool hit a failure the turn cannot continue past
    #[error("Tool '{tool}' aborted the turn: {message}")]
    ToolAborted { tool: String, message: String },

    /// Loading or saving a checkpoint failed
    #[error("Checkpoint store error: {0}")]
    Store(String),

    /// A prompt could not be selected or rendered
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// The turn took more steps than allowed
    #[error("Recursion limit of {0} steps reached without suspending")]
    RecursionLimit(u32),

    /// The turn was cancelled before it suspended
    #[error("Turn cancelled")]
    Cancelled,

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}
