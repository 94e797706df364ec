//! Shared request types, errors and JSON endpoints.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use parley_stream::{CallSession, StreamPhase};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// Form fields the telephony platform posts to every voice webhook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceWebhook {
    #[serde(rename = "CallSid", default)]
    pub call_sid: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
    #[serde(rename = "SpeechResult", default)]
    pub speech_result: Option<String>,
}

impl VoiceWebhook {
    /// The call identifier, rejected when blank.
    pub fn call_id(&self) -> Result<&str, ApiError> {
        let call_id = self.call_sid.trim();
        if call_id.is_empty() {
            return Err(ApiError::BadRequest("missing CallSid".to_string()));
        }
        Ok(call_id)
    }

    /// The recognized speech, if any usable text was recognized.
    pub fn speech(&self) -> Option<&str> {
        self.speech_result
            .as_deref()
            .map(str::trim)
            .filter(|speech| !speech.is_empty())
    }
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One entry of `GET /api/calls`.
#[derive(Debug, Serialize)]
pub struct CallSummary {
    #[serde(rename = "callSid")]
    pub call_sid: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    /// Conversation entries so far, counting both speakers.
    pub turns: usize,
    /// State of the reply being streamed, if any.
    pub stream: Option<StreamPhase>,
}

/// Handler for `GET /api/calls`.
pub async fn list_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<CallSummary>> {
    let calls = state
        .calls
        .active_sessions()
        .into_iter()
        .map(|session| CallSummary {
            stream: state.streams.phase(&session.call_id),
            turns: session.turns.len(),
            call_sid: session.call_id,
            from: session.from,
            to: session.to,
            started_at: session.started_at,
        })
        .collect();
    Json(calls)
}

/// Handler for `GET /api/calls/{callSid}`.
pub async fn get_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_sid): Path<String>,
) -> Result<Json<CallSession>, ApiError> {
    state
        .calls
        .get(&call_sid)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no active call {}", call_sid)))
}
