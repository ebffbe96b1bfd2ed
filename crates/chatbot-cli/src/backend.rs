//! Client for the chat application's bot API
//!
//! Every call forwards the user's `Authorization` value unchanged so the
//! backend acts on behalf of the user who wrote the message.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::BackendConfig;
use crate::utils::truncate_chars;

const REPLY_PATH: &str = "/api/bot/conversation/reply";
const FORWARD_PATH: &str = "/api/bot/conversation/forward-chat-links";
const SEARCH_PATH: &str = "/api/bot/search/chats";

/// Errors talking to the backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{path} returned {status}: {body}")]
    Status {
        path: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid JSON from {path}: {source}")]
    Json {
        path: &'static str,
        source: serde_json::Error,
    },
}

impl From<BackendError> for chatbot_agent::ToolError {
    fn from(e: BackendError) -> Self {
        chatbot_agent::ToolError::Backend(e.to_string())
    }
}

/// The bot endpoints of the chat application
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a message to the user
    async fn reply(&self, auth: Option<&str>, text: &str) -> Result<Value, BackendError>;

    /// Send chat links to the user with a comment
    async fn forward_links(
        &self,
        auth: Option<&str>,
        comment: &str,
        links: &[String],
    ) -> Result<Value, BackendError>;

    /// Search chats. `search_type` is 1 (public), 2 (private) or 3 (all).
    async fn search(
        &self,
        auth: Option<&str>,
        text: &str,
        search_type: u8,
    ) -> Result<Value, BackendError>;
}

/// [`ChatBackend`] over HTTP
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        if config.accept_invalid_certs {
            tracing::warn!("TLS certificate verification is disabled for the backend");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(
        &self,
        path: &'static str,
        auth: Option<&str>,
        body: Value,
    ) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "backend request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(auth) = auth {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                path,
                status: status.as_u16(),
                body: truncate_chars(&body, 200),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(json!({}));
        }
        serde_json::from_slice(&bytes).map_err(|source| BackendError::Json { path, source })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn reply(&self, auth: Option<&str>, text: &str) -> Result<Value, BackendError> {
        self.post(REPLY_PATH, auth, json!({ "text": text })).await
    }

    async fn forward_links(
        &self,
        auth: Option<&str>,
        comment: &str,
        links: &[String],
    ) -> Result<Value, BackendError> {
        self.post(FORWARD_PATH, auth, json!({ "comment": comment, "links": links }))
            .await
    }

    async fn search(
        &self,
        auth: Option<&str>,
        text: &str,
        search_type: u8,
    ) -> Result<Value, BackendError> {
        self.post(SEARCH_PATH, auth, json!({ "text": text, "searchType": search_type }))
            .await
    }
}
