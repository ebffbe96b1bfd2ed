//! Errors from the model provider layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a model call could not be started
///
/// Failures after the stream is open arrive as `MessageEvent::Error` instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No key was configured and none of the variables is set
    #[error("No API key found (set {})", .0.join(" or "))]
    MissingApiKey(Vec<String>),

    /// The API key or a model header cannot be sent as an HTTP header
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("SSE error: {0}")]
    Sse(String),
}

impl Error {
    /// Whether sending the same request again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Sse(_))
    }
}
