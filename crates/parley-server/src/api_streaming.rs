//! Streaming call flow.
//!
//! `process` starts producing the reply in the background and answers at
//! once. The platform then follows redirects to `process-stream` and
//! `next-chunk`, each of which speaks at most one chunk, until the turn
//! ends.

use crate::api::{ApiError, VoiceWebhook};
use crate::twiml::{self, VoiceResponse};
use crate::AppState;
use axum::extract::{Extension, Form, Query};
use parley_stream::DeliveryStep;
use parley_types::UNRECOGNIZED_TEXT;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Query string of `next-chunk` polls.
#[derive(Debug, Deserialize)]
pub struct NextChunkQuery {
    #[serde(rename = "callSid", default)]
    pub call_sid: String,
}

/// Handler for `POST /api/streaming/answer`.
pub async fn answer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(webhook): Form<VoiceWebhook>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = webhook.call_id()?;
    info!(call_id, from = %webhook.from, to = %webhook.to, "incoming streaming call answered");

    state.calls.create(call_id, &webhook.from, &webhook.to);
    Ok(twiml::welcome(twiml::STREAMING_PROCESS_PATH))
}

/// Handler for `POST /api/streaming/process`.
pub async fn process_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(webhook): Form<VoiceWebhook>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = webhook.call_id()?;
    let Some(speech) = webhook.speech() else {
        warn!(call_id, "no usable speech recognized, re-prompting");
        return Ok(twiml::error(UNRECOGNIZED_TEXT, twiml::STREAMING_ANSWER_PATH));
    };

    let started = Instant::now();
    info!(call_id, speech, "processing speech (streaming)");

    state.ensure_call(call_id, &webhook);
    let history = state.calls.history(call_id);
    state.streams.start(call_id, speech, history).await;

    info!(
        call_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "streaming reply started"
    );
    Ok(twiml::streaming_processing())
}

/// Handler for `POST /api/streaming/process-stream`, the first poll of a turn.
pub async fn process_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(webhook): Form<VoiceWebhook>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = webhook.call_id()?;
    let delay = state.streams.config().process_stream_delay();
    let step = state.delivery.step_after(call_id, delay).await;
    Ok(render_step(step, call_id))
}

/// Handler for `GET|POST /api/streaming/next-chunk?callSid=...`.
pub async fn next_chunk_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<NextChunkQuery>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = query.call_sid.trim();
    if call_id.is_empty() {
        return Err(ApiError::BadRequest("missing callSid".to_string()));
    }
    let delay = state.streams.config().next_chunk_delay();
    let step = state.delivery.step_after(call_id, delay).await;
    Ok(render_step(step, call_id))
}

/// Handler for `POST /api/streaming/hangup`.
pub async fn hangup_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(webhook): Form<VoiceWebhook>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = webhook.call_id()?;
    info!(call_id, "streaming call ended");

    state.streams.cleanup(call_id);
    state.calls.end(call_id);
    Ok(twiml::goodbye())
}

fn render_step(step: DeliveryStep, call_id: &str) -> VoiceResponse {
    match step {
        DeliveryStep::Speak { chunk, end_of_turn } => {
            twiml::streaming_chunk(&chunk, end_of_turn, call_id)
        }
        DeliveryStep::Wait => twiml::streaming_chunk("", false, call_id),
        DeliveryStep::EndOfTurn => twiml::streaming_complete(),
    }
}
