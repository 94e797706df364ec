#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::post,
    Json, Router,
};
use futures_util::stream::{self, StreamExt};
use parley_llm::{assemble, CompletionClient, CompletionConfig, FragmentStream, TokenSource};
use parley_server::{app, AppState};
use parley_stream::StreamingConfig;
use parley_types::Turn;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const XML_PROLOGUE: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#;

/// Token source replaying canned replies, one per turn.
#[derive(Default)]
pub struct ScriptedSource {
    replies: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedSource {
    pub fn new(replies: &[&[&str]]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .iter()
                    .map(|tokens| assemble(tokens.iter().copied()))
                    .collect(),
            ),
        })
    }
}

impl TokenSource for ScriptedSource {
    fn stream(&self, _prompt: &str, _history: &[Turn], _cancel: CancellationToken) -> FragmentStream {
        let fragments = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        stream::iter(fragments.into_iter().map(Ok)).boxed()
    }
}

/// Token source that never produces anything.
pub struct SilentSource;

impl TokenSource for SilentSource {
    fn stream(&self, _prompt: &str, _history: &[Turn], _cancel: CancellationToken) -> FragmentStream {
        stream::pending().boxed()
    }
}

/// Serves a fake completion API answering every request with `reply`.
///
/// Returns the base URL and a request counter.
pub async fn spawn_completion_api(reply: &'static str) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(_body): Json<Value>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "choices": [{ "message": { "content": reply } }] }))
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}/v1", addr), hits)
}

/// A completion client pointed at a port nobody listens on.
pub async fn unreachable_completion() -> CompletionClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    completion_client(format!("http://{}/v1", addr))
}

pub fn completion_client(base_url: String) -> CompletionClient {
    CompletionClient::new(CompletionConfig::new(base_url, "test-key")).unwrap()
}

pub fn instant_streaming() -> StreamingConfig {
    StreamingConfig {
        first_chunk_grace_ms: 0,
        process_stream_delay_ms: 0,
        next_chunk_delay_ms: 0,
        ..StreamingConfig::default()
    }
}

pub fn test_app(source: Arc<dyn TokenSource>, completion: CompletionClient) -> Router {
    app(AppState::new(source, completion, instant_streaming()))
}

pub fn form_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Sends one request and returns status, content type and body text.
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

pub async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

fn between<'a>(xml: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = xml.find(open)? + open.len();
    let end = xml[start..].find(close)? + start;
    Some(&xml[start..end])
}

/// Text of the chunk spoken at the top of a streaming poll response.
pub fn spoken_chunk(xml: &str) -> Option<String> {
    let body = xml.strip_prefix(XML_PROLOGUE)?;
    let open = r#"<Say voice="alice">"#;
    if !body.starts_with(open) {
        return None;
    }
    between(body, open, "</Say>").map(|text| text.replace("&amp;", "&"))
}

/// Target of the response's `<Redirect>`, if any.
pub fn redirect_target(xml: &str) -> Option<String> {
    between(xml, r#"<Redirect method="POST">"#, "</Redirect>").map(|url| url.replace("&amp;", "&"))
}
