//! Blocking call flow: the whole reply is fetched before anything is spoken.

use crate::api::{ApiError, VoiceWebhook};
use crate::twiml::{self, VoiceResponse};
use crate::AppState;
use axum::extract::{Extension, Form};
use parley_types::UNRECOGNIZED_TEXT;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Handler for `POST /api/call/answer`.
pub async fn answer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(webhook): Form<VoiceWebhook>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = webhook.call_id()?;
    info!(call_id, from = %webhook.from, to = %webhook.to, "incoming call answered");

    state.calls.create(call_id, &webhook.from, &webhook.to);
    Ok(twiml::welcome(twiml::CALL_PROCESS_PATH))
}

/// Handler for `POST /api/call/process`.
pub async fn process_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(webhook): Form<VoiceWebhook>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = webhook.call_id()?;
    let Some(speech) = webhook.speech() else {
        warn!(call_id, "no usable speech recognized, re-prompting");
        return Ok(twiml::error(UNRECOGNIZED_TEXT, twiml::CALL_ANSWER_PATH));
    };

    let started = Instant::now();
    info!(call_id, speech, "processing speech");

    state.ensure_call(call_id, &webhook);
    let history = state.calls.history(call_id);
    let reply = state.completion.complete(speech, &history).await;
    state.calls.append_turn(call_id, speech, &reply);

    info!(
        call_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "processed speech"
    );
    Ok(twiml::continue_conversation(&reply))
}

/// Handler for `POST /api/call/hangup`.
pub async fn hangup_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(webhook): Form<VoiceWebhook>,
) -> Result<VoiceResponse, ApiError> {
    let call_id = webhook.call_id()?;
    info!(call_id, "call ended");

    state.calls.end(call_id);
    Ok(twiml::goodbye())
}
