//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

/// Configuration for chatbot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub backend: BackendConfig,
    pub summarization: SummarizationConfig,
    pub store: StoreSettings,
    pub prompts: PromptSettings,
    pub auth: AuthSettings,
}

/// Model settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model id (default: claude-3-haiku-20240307)
    pub model: Option<String>,
    /// API key (alternative to environment variables)
    pub api_key: Option<String>,
    /// Override the Anthropic API base URL
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    /// Retries for rate limits and overloaded responses
    pub max_retries: Option<u32>,
}

/// Chat application backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Skip TLS certificate verification. Only for local development.
    pub accept_invalid_certs: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    /// Summarize once a thread holds this many messages
    pub threshold: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self { threshold: 1000 }
    }
}

/// Where thread checkpoints live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Keep threads in process memory instead of on disk
    pub in_memory: bool,
    /// Directory for thread files (default: <data dir>/chatbot/threads)
    pub dir: Option<String>,
    /// In-memory only: threads kept before the least recently used is dropped
    pub max_threads: Option<usize>,
    /// In-memory only: idle seconds before a thread is dropped; 0 never expires
    pub idle_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory of `<key>.txt` prompt overrides
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// JWT claim holding the conversation id
    pub thread_claim: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            thread_claim: "conversation_id".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatbot")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CHATBOT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default path
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults
    pub fn load_from(path: &std::path::Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to parse config file: {}", e);
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            llm: LlmConfig {
                model: Some(DEFAULT_MODEL.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        default_config.save_to(&path)?;
        Ok(path)
    }

    pub fn model(&self) -> &str {
        self.llm.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// API key from config, then `CLAUDE_API_KEY`, then `ANTHROPIC_API_KEY`
    pub fn api_key(&self) -> chatbot_ai::Result<String> {
        chatbot_ai::providers::get_api_key(
            self.llm.api_key.as_deref(),
            &["CLAUDE_API_KEY", "ANTHROPIC_API_KEY"],
        )
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# chatbot configuration file
# Place at ~/.config/chatbot/config.toml (Linux) or set CHATBOT_CONFIG_PATH

[llm]
model = "claude-3-haiku-20240307"
# api_key = "sk-ant-..."   # or CLAUDE_API_KEY / ANTHROPIC_API_KEY
# max_tokens = 1024
# max_retries = 3

[backend]
base_url = "http://localhost:8080"
timeout_secs = 30
# Never enable outside local development
accept_invalid_certs = false

[summarization]
threshold = 1000

[store]
in_memory = false
# dir = "~/.local/share/chatbot/threads"
# In-memory limits:
# max_threads = 10000
# idle_ttl_secs = 86400

[prompts]
# dir = "~/.config/chatbot/prompts"   # agent.system.txt, summary.create.txt, ...

[auth]
thread_claim = "conversation_id"
"#
}
