use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Keep your responses \
concise and conversational, suitable for voice interaction. Respond in a friendly and engaging \
manner.";

const DEFAULT_STREAMING_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Keep your \
responses concise and conversational, suitable for voice interaction. Respond in a friendly and \
engaging manner. Aim for responses that are 1-2 sentences for better voice flow.";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_temperature() -> f32 {
    0.7
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_streaming_system_prompt() -> String {
    DEFAULT_STREAMING_SYSTEM_PROMPT.to_string()
}

fn default_request_timeout_secs() -> u64 {
    8
}

fn default_stream_timeout_secs() -> u64 {
    30
}

/// Settings for the hosted chat-completion API.
#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// API root, without the `/chat/completions` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// System prompt for the blocking (non-streamed) call flow.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// System prompt for streamed replies. Asks for shorter answers.
    #[serde(default = "default_streaming_system_prompt")]
    pub streaming_system_prompt: String,
    /// Whole-request timeout for blocking completions. Default: 8.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Whole-request timeout for streamed completions. Default: 30.
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            streaming_system_prompt: default_streaming_system_prompt(),
            request_timeout_secs: default_request_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stream_timeout_secs", &self.stream_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl CompletionConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}
