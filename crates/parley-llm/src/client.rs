use crate::config::CompletionConfig;
use crate::error::LlmError;
use crate::messages::{build_messages, ChatRequest, ChatResponse};
use parley_types::{Turn, COMPLETION_ERROR_TEXT, FALLBACK_TEXT, NOT_UNDERSTOOD_TEXT};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Client for single-shot (non-streamed) completions.
///
/// Used by the blocking call flow, where the whole reply is fetched before
/// anything is spoken.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    config: Arc<CompletionConfig>,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Returns the assistant's reply, or a spoken apology if the request
    /// failed. Never returns an error.
    pub async fn complete(&self, prompt: &str, history: &[Turn]) -> String {
        let started = Instant::now();
        let reply = match self.try_complete(prompt, history).await {
            Ok(Some(reply)) => reply,
            Ok(None) => NOT_UNDERSTOOD_TEXT.to_string(),
            Err(LlmError::Status(status)) => {
                error!(%status, "completion request rejected");
                FALLBACK_TEXT.to_string()
            }
            Err(e) => {
                error!(error = %e, "completion request failed");
                COMPLETION_ERROR_TEXT.to_string()
            }
        };
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion finished"
        );
        reply
    }

    /// Performs the request and surfaces every failure.
    ///
    /// Returns `Ok(None)` when the response carried no message content.
    pub async fn try_complete(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<Option<String>, LlmError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: build_messages(&self.config.system_prompt, history, prompt),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let response = self
            .http
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::Status(response.status()));
        }

        let text = response.text().await?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Malformed(e.to_string()))?;
        Ok(parsed.content().map(str::to_string))
    }
}
