use crate::assembler::FragmentAssembler;
use crate::config::CompletionConfig;
use crate::error::LlmError;
use crate::messages::{build_messages, ChatRequest, StreamChunk};
use crate::sse::{SseDecoder, SseEvent};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parley_types::{Turn, FALLBACK_TEXT};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Lazy, finite sequence of reply fragments for one user turn.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// Produces the reply to one caller utterance as a stream of fragments.
///
/// Implementations must not do any work until the stream is polled, must
/// end the stream promptly once `cancel` fires, and must report an upstream
/// rejection as an empty stream rather than an error item.
pub trait TokenSource: Send + Sync + 'static {
    fn stream(&self, prompt: &str, history: &[Turn], cancel: CancellationToken) -> FragmentStream;
}

/// Token source backed by an OpenAI-compatible streaming completion API.
#[derive(Debug, Clone)]
pub struct OpenAiTokenSource {
    http: reqwest::Client,
    config: Arc<CompletionConfig>,
}

impl OpenAiTokenSource {
    pub fn new(config: CompletionConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.stream_timeout())
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }
}

impl TokenSource for OpenAiTokenSource {
    fn stream(&self, prompt: &str, history: &[Turn], cancel: CancellationToken) -> FragmentStream {
        let http = self.http.clone();
        let config = Arc::clone(&self.config);
        let messages = build_messages(&config.streaming_system_prompt, history, prompt);

        let stream = async_stream::stream! {
            let body = ChatRequest {
                model: &config.model,
                messages,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                stream: true,
            };
            let request = http
                .post(config.completions_url())
                .bearer_auth(&config.api_key)
                .json(&body)
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => return,
                response = request => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "completion stream request failed");
                    yield Err(LlmError::Transport(e));
                    return;
                }
            };
            if !response.status().is_success() {
                error!(status = %response.status(), "completion stream request rejected");
                return;
            }

            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut assembler = FragmentAssembler::new();

            'read: loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        assembler.discard();
                        return;
                    }
                    next = body.next() => next,
                };
                let (events, ended) = match next {
                    Some(Ok(bytes)) => (decoder.feed(&bytes), false),
                    Some(Err(e)) => {
                        error!(error = %e, "completion stream read failed");
                        yield Err(LlmError::Transport(e));
                        return;
                    }
                    None => (decoder.finish().into_iter().collect(), true),
                };

                for event in events {
                    let data = match event {
                        SseEvent::Done => break 'read,
                        SseEvent::Data(data) => data,
                    };
                    let chunk = match serde_json::from_str::<StreamChunk>(&data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!(error = %e, data = %data, "skipping malformed stream event");
                            continue;
                        }
                    };
                    let Some(fragment) = chunk.token().and_then(|token| assembler.push(token)) else {
                        continue;
                    };
                    if cancel.is_cancelled() {
                        return;
                    }
                    debug!(fragment = %fragment, "completion fragment ready");
                    yield Ok(fragment);
                }

                if ended {
                    break;
                }
            }

            if cancel.is_cancelled() {
                return;
            }
            if let Some(rest) = assembler.finish() {
                yield Ok(rest);
            }
        };

        Box::pin(stream)
    }
}

/// Drains a token source into one reply string.
///
/// Fragments are concatenated without separators and the result trimmed. A
/// source that produced nothing yields [`FALLBACK_TEXT`]. A fault keeps the
/// text gathered before it.
pub async fn collect_completion(
    source: &dyn TokenSource,
    prompt: &str,
    history: &[Turn],
    cancel: CancellationToken,
) -> String {
    let mut stream = source.stream(prompt, history, cancel);
    let mut reply = String::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => reply.push_str(&fragment),
            Err(e) => {
                warn!(error = %e, "completion stream ended with a fault");
                break;
            }
        }
    }

    let reply = reply.trim();
    if reply.is_empty() {
        FALLBACK_TEXT.to_string()
    } else {
        reply.to_string()
    }
}
