#![allow(dead_code)]

use futures_util::stream::{self, StreamExt};
use parley_llm::{assemble, FragmentStream, LlmError, TokenSource};
use parley_stream::{CallSessionStore, StreamCoordinator, StreamingConfig};
use parley_types::Turn;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Hands out one prepared stream per `stream` call, then empty streams.
pub struct QueuedSource {
    streams: Mutex<VecDeque<FragmentStream>>,
    prompts: Mutex<Vec<(String, usize)>>,
}

impl QueuedSource {
    pub fn new(streams: Vec<FragmentStream>) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(streams.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Prompts seen so far, with the length of the history passed along.
    pub fn prompts(&self) -> Vec<(String, usize)> {
        self.prompts.lock().unwrap().clone()
    }
}

impl TokenSource for QueuedSource {
    fn stream(&self, prompt: &str, history: &[Turn], _cancel: CancellationToken) -> FragmentStream {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), history.len()));
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| stream::empty().boxed())
    }
}

/// Fragments the completion API would produce for these raw tokens.
pub fn scripted(tokens: &[&str]) -> FragmentStream {
    fragments(assemble(tokens.iter().copied()))
}

pub fn fragments(fragments: Vec<String>) -> FragmentStream {
    stream::iter(fragments.into_iter().map(Ok)).boxed()
}

/// Like [`fragments`], pausing before each one.
pub fn slow(fragments: Vec<String>, delay: Duration) -> FragmentStream {
    stream::iter(fragments)
        .then(move |fragment| async move {
            tokio::time::sleep(delay).await;
            Ok(fragment)
        })
        .boxed()
}

/// Emits `before`, then fails.
pub fn failing(before: &[&str]) -> FragmentStream {
    let head: Vec<Result<String, LlmError>> = before.iter().map(|f| Ok(f.to_string())).collect();
    stream::iter(head)
        .chain(stream::once(async {
            Err(LlmError::Malformed("connection reset".to_string()))
        }))
        .boxed()
}

pub fn panicking() -> FragmentStream {
    stream::poll_fn(|_| -> Poll<Option<Result<String, LlmError>>> {
        panic!("token source exploded")
    })
    .boxed()
}

/// A stream fed by the test. It ends when the sender is dropped.
pub fn gated() -> (mpsc::UnboundedSender<Result<String, LlmError>>, FragmentStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();
    (tx, stream)
}

pub fn test_config() -> StreamingConfig {
    StreamingConfig {
        first_chunk_grace_ms: 0,
        process_stream_delay_ms: 0,
        next_chunk_delay_ms: 0,
        ..StreamingConfig::default()
    }
}

/// A coordinator over `source` with a fresh call store holding `call_id`.
pub fn coordinator_for(
    source: Arc<dyn TokenSource>,
    config: StreamingConfig,
    call_id: &str,
) -> (StreamCoordinator, CallSessionStore) {
    let calls = CallSessionStore::new();
    calls.create(call_id, "+15550100", "+15550199");
    (StreamCoordinator::new(source, calls.clone(), config), calls)
}

/// Polls until the turn is complete and returns every chunk seen.
pub async fn drain(coordinator: &StreamCoordinator, call_id: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let poll = coordinator.poll(call_id);
            if let Some(chunk) = poll.chunk {
                chunks.push(chunk);
            }
            if poll.complete {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("stream should complete");
    chunks
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition should become true");
}
