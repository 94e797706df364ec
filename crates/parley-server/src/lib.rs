//! Parley server library logic.

pub mod api;
pub mod api_call;
pub mod api_streaming;
pub mod config;
pub mod twiml;

use api::VoiceWebhook;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use config::Config;
use parley_llm::{CompletionClient, LlmError, OpenAiTokenSource, TokenSource};
use parley_stream::{CallSessionStore, DeliveryLoop, StreamCoordinator, StreamingConfig};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum accepted webhook body. Form posts from the platform are small.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Conversation state of every active call.
    pub calls: CallSessionStore,
    /// Replies currently being streamed, one per call at most.
    pub streams: StreamCoordinator,
    /// Poll-driven delivery of streamed replies.
    pub delivery: DeliveryLoop,
    /// Blocking completion client for the non-streaming flow.
    pub completion: CompletionClient,
}

impl AppState {
    pub fn new(
        source: Arc<dyn TokenSource>,
        completion: CompletionClient,
        streaming: StreamingConfig,
    ) -> Self {
        let calls = CallSessionStore::new();
        let streams = StreamCoordinator::new(source, calls.clone(), streaming);
        Self {
            delivery: DeliveryLoop::new(streams.clone()),
            calls,
            streams,
            completion,
        }
    }

    /// Builds the state backed by the configured completion API.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        if config.openai.api_key.is_empty() {
            tracing::warn!("no completion API key configured, requests will be rejected");
        }
        let source = OpenAiTokenSource::new(config.openai.clone())?;
        let completion = CompletionClient::new(config.openai.clone())?;
        Ok(Self::new(
            Arc::new(source),
            completion,
            config.streaming.clone(),
        ))
    }

    /// Registers the call if its answer webhook was never seen.
    fn ensure_call(&self, call_id: &str, webhook: &VoiceWebhook) {
        if self.calls.get(call_id).is_none() {
            tracing::warn!(call_id, "speech for unknown call, creating session");
            self.calls.create(call_id, &webhook.from, &webhook.to);
        }
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/calls", get(api::list_calls_handler))
        .route("/api/calls/{callSid}", get(api::get_call_handler))
        .route("/api/call/answer", post(api_call::answer_handler))
        .route("/api/call/process", post(api_call::process_handler))
        .route("/api/call/hangup", post(api_call::hangup_handler))
        .route("/api/streaming/answer", post(api_streaming::answer_handler))
        .route("/api/streaming/process", post(api_streaming::process_handler))
        .route(
            "/api/streaming/process-stream",
            post(api_streaming::process_stream_handler),
        )
        .route(
            "/api/streaming/next-chunk",
            get(api_streaming::next_chunk_handler).post(api_streaming::next_chunk_handler),
        )
        .route("/api/streaming/hangup", post(api_streaming::hangup_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
