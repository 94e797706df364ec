//! Background production of a streamed reply, drained by short polls.
//!
//! Each in-flight turn owns a streaming session: a bounded FIFO of
//! spoken chunks, a "finished" flag and the accumulated reply text. Exactly
//! one producer task writes to it. Any number of poll requests read from it,
//! and none of them ever waits on the producer.
//!
//! Sessions carry a generation id. A producer whose generation is no longer
//! the one registered for its call (the call hung up, or a newer turn
//! replaced it) stops writing and never folds its reply into the call
//! history.

use crate::calls::CallSessionStore;
use crate::config::StreamingConfig;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parley_llm::TokenSource;
use parley_types::{Turn, APOLOGY_TEXT, FALLBACK_TEXT};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Observable state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    /// The producer is still running.
    Producing,
    /// The producer finished; chunks are still queued.
    Draining,
    /// The producer finished and every chunk was delivered.
    Finished,
}

/// Result of one poll: the dequeued chunk, if any, and the completion test
/// evaluated right after the dequeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPoll {
    pub chunk: Option<String>,
    pub complete: bool,
}

#[derive(Debug)]
struct StreamingSession {
    call_id: String,
    generation: Uuid,
    created_at: DateTime<Utc>,
    chunks: Mutex<mpsc::Receiver<String>>,
    finished: AtomicBool,
    full_response: Mutex<String>,
    cancel: CancellationToken,
}

fn recover<G>(poisoned: PoisonError<G>) -> G {
    error!("streaming session lock poisoned, recovering");
    poisoned.into_inner()
}

impl StreamingSession {
    fn new(call_id: &str, chunks: mpsc::Receiver<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            generation: Uuid::new_v4(),
            created_at: Utc::now(),
            chunks: Mutex::new(chunks),
            finished: AtomicBool::new(false),
            full_response: Mutex::new(String::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn lock_chunks(&self) -> MutexGuard<'_, mpsc::Receiver<String>> {
        self.chunks.lock().unwrap_or_else(recover)
    }

    // The flag is always loaded before the queue is inspected. Every chunk
    // is enqueued before the flag is stored, so "finished and empty" can
    // never hide a trailing chunk.

    fn poll(&self) -> ChunkPoll {
        let mut chunks = self.lock_chunks();
        let finished = self.finished.load(Ordering::Acquire);
        let chunk = chunks.try_recv().ok();
        ChunkPoll {
            chunk,
            complete: finished && chunks.is_empty(),
        }
    }

    fn is_complete(&self) -> bool {
        let chunks = self.lock_chunks();
        self.finished.load(Ordering::Acquire) && chunks.is_empty()
    }

    fn phase(&self) -> StreamPhase {
        let chunks = self.lock_chunks();
        if !self.finished.load(Ordering::Acquire) {
            StreamPhase::Producing
        } else if chunks.is_empty() {
            StreamPhase::Finished
        } else {
            StreamPhase::Draining
        }
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Stops production early. Already queued chunks stay deliverable.
    fn force_finish(&self) {
        let mut chunks = self.lock_chunks();
        chunks.close();
        self.cancel.cancel();
        self.finished.store(true, Ordering::Release);
    }

    fn push_response(&self, text: &str) {
        self.full_response
            .lock()
            .unwrap_or_else(recover)
            .push_str(text);
    }

    fn full_response(&self) -> String {
        self.full_response.lock().unwrap_or_else(recover).clone()
    }
}

/// Owns the streaming sessions of every call.
///
/// Clones share the same session map, call store and token source.
#[derive(Clone)]
pub struct StreamCoordinator {
    sessions: Arc<RwLock<HashMap<String, Arc<StreamingSession>>>>,
    calls: CallSessionStore,
    source: Arc<dyn TokenSource>,
    config: StreamingConfig,
}

impl StreamCoordinator {
    pub fn new(
        source: Arc<dyn TokenSource>,
        calls: CallSessionStore,
        config: StreamingConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            calls,
            source,
            config,
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<StreamingSession>>> {
        self.sessions.read().unwrap_or_else(recover)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<StreamingSession>>> {
        self.sessions.write().unwrap_or_else(recover)
    }

    fn session(&self, call_id: &str) -> Option<Arc<StreamingSession>> {
        self.read().get(call_id).cloned()
    }

    fn is_current(&self, session: &StreamingSession) -> bool {
        self.read()
            .get(&session.call_id)
            .is_some_and(|current| current.generation == session.generation)
    }

    /// Starts producing the reply to `user_text` in the background.
    ///
    /// Any session already registered for `call_id` is cancelled and
    /// replaced. Returns the new session's generation after waiting the
    /// configured first-chunk grace period.
    pub async fn start(&self, call_id: &str, user_text: &str, history: Vec<Turn>) -> Uuid {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        let session = Arc::new(StreamingSession::new(call_id, rx));
        let generation = session.generation;

        let previous = self
            .write()
            .insert(call_id.to_string(), Arc::clone(&session));
        if let Some(previous) = previous {
            previous.cancel.cancel();
            if previous.finished.load(Ordering::Acquire) {
                debug!(call_id, replaced = %previous.generation, "replaced finished streaming session");
            } else {
                warn!(
                    call_id,
                    replaced = %previous.generation,
                    age_ms = (Utc::now() - previous.created_at).num_milliseconds(),
                    "superseded unfinished streaming session"
                );
            }
        }
        info!(call_id, %generation, "started streaming session");

        let producer = Producer {
            coordinator: self.clone(),
            session,
            tx,
        };
        tokio::spawn(producer.run(user_text.to_string(), history));

        tokio::time::sleep(self.config.first_chunk_grace()).await;
        generation
    }

    /// Dequeues the oldest undelivered chunk. Never waits.
    pub fn next_chunk(&self, call_id: &str) -> Option<String> {
        self.session(call_id)?.poll().chunk
    }

    /// `true` once the producer finished and every chunk was delivered.
    ///
    /// Unknown calls are complete.
    pub fn is_complete(&self, call_id: &str) -> bool {
        self.session(call_id)
            .map_or(true, |session| session.is_complete())
    }

    /// Dequeue plus completion test as one consistent read.
    pub fn poll(&self, call_id: &str) -> ChunkPoll {
        match self.session(call_id) {
            Some(session) => session.poll(),
            None => ChunkPoll {
                chunk: None,
                complete: true,
            },
        }
    }

    pub fn phase(&self, call_id: &str) -> Option<StreamPhase> {
        self.session(call_id).map(|session| session.phase())
    }

    /// Marks the session finished and stops its producer.
    ///
    /// Chunks already queued can still be drained. The reply is not folded
    /// into the call history.
    pub fn complete(&self, call_id: &str) -> bool {
        let Some(session) = self.session(call_id) else {
            return false;
        };
        session.force_finish();
        info!(call_id, generation = %session.generation, "streaming session completed early");
        true
    }

    /// Removes the session and cancels its producer. Idempotent.
    pub fn cleanup(&self, call_id: &str) -> bool {
        let Some(session) = self.write().remove(call_id) else {
            return false;
        };
        session.cancel.cancel();
        debug!(
            call_id,
            generation = %session.generation,
            duration_ms = (Utc::now() - session.created_at).num_milliseconds(),
            "cleaned up streaming session"
        );
        true
    }

    pub fn active_streams(&self) -> usize {
        self.read().len()
    }
}

enum Outcome {
    Exhausted { fragments: usize },
    Faulted,
    Orphaned,
}

/// Write side of one streaming session.
#[derive(Clone)]
struct Producer {
    coordinator: StreamCoordinator,
    session: Arc<StreamingSession>,
    tx: mpsc::Sender<String>,
}

impl Producer {
    async fn run(self, user_text: String, history: Vec<Turn>) {
        let call_id = self.session.call_id.as_str();
        let generation = self.session.generation;

        // Consumed in its own task so a panic inside the token source
        // surfaces here as a JoinError instead of killing the producer.
        let pump = tokio::spawn(self.clone().pump(user_text.clone(), history));
        let outcome = match pump.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(call_id, %generation, error = %e, "streaming producer panicked");
                Outcome::Faulted
            }
        };

        let delivered = match outcome {
            Outcome::Orphaned => false,
            Outcome::Exhausted { fragments: 0 } => {
                warn!(call_id, %generation, "token source produced nothing, using fallback");
                self.enqueue(FALLBACK_TEXT.to_string()).await
            }
            Outcome::Exhausted { fragments } => {
                debug!(call_id, %generation, fragments, "token source exhausted");
                true
            }
            Outcome::Faulted => self.enqueue(APOLOGY_TEXT.to_string()).await,
        };

        if !delivered
            || self.session.cancel.is_cancelled()
            || !self.coordinator.is_current(&self.session)
        {
            debug!(call_id, %generation, "streaming session gone, dropping reply");
            return;
        }

        // Folded once production ends, whether or not every chunk was heard.
        let reply = self.session.full_response();
        self.coordinator
            .calls
            .append_turn(call_id, &user_text, &reply);
        self.session.mark_finished();
        info!(call_id, %generation, reply_len = reply.len(), "streaming reply produced");
    }

    async fn pump(self, user_text: String, history: Vec<Turn>) -> Outcome {
        let mut stream =
            self.coordinator
                .source
                .stream(&user_text, &history, self.session.cancel.clone());
        let mut fragments = 0usize;

        loop {
            let item = tokio::select! {
                _ = self.session.cancel.cancelled() => return Outcome::Orphaned,
                item = stream.next() => item,
            };
            match item {
                None => return Outcome::Exhausted { fragments },
                Some(Ok(fragment)) => {
                    if !self.enqueue(fragment).await {
                        return Outcome::Orphaned;
                    }
                    fragments += 1;
                }
                Some(Err(e)) => {
                    warn!(
                        call_id = %self.session.call_id,
                        fragments,
                        error = %e,
                        "token source failed mid-reply"
                    );
                    return Outcome::Faulted;
                }
            }
        }
    }

    /// Queues one chunk. Returns `false` once the session is no longer the
    /// call's current one, in which case nothing is written.
    async fn enqueue(&self, chunk: String) -> bool {
        if self.session.cancel.is_cancelled() || !self.coordinator.is_current(&self.session) {
            return false;
        }
        self.session.push_response(&chunk);
        tokio::select! {
            _ = self.session.cancel.cancelled() => false,
            sent = self.tx.send(chunk) => sent.is_ok(),
        }
    }
}
