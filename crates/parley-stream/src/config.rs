use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_first_chunk_grace_ms() -> u64 {
    100
}

fn default_process_stream_delay_ms() -> u64 {
    200
}

fn default_next_chunk_delay_ms() -> u64 {
    100
}

fn default_chunk_queue_capacity() -> usize {
    64
}

/// Timing and sizing of streamed reply delivery.
///
/// The delays exist because the telephony platform can only poll. They
/// trade a little latency per request for a better chance that a chunk is
/// ready when the poll arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// How long `start` waits after launching the producer. Default: 100.
    #[serde(default = "default_first_chunk_grace_ms")]
    pub first_chunk_grace_ms: u64,
    /// Wait before the first poll of a turn. Default: 200.
    #[serde(default = "default_process_stream_delay_ms")]
    pub process_stream_delay_ms: u64,
    /// Wait before each follow-up poll. Default: 100.
    #[serde(default = "default_next_chunk_delay_ms")]
    pub next_chunk_delay_ms: u64,
    /// Chunks buffered before the producer has to wait for a poll.
    #[serde(default = "default_chunk_queue_capacity")]
    pub chunk_queue_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            first_chunk_grace_ms: default_first_chunk_grace_ms(),
            process_stream_delay_ms: default_process_stream_delay_ms(),
            next_chunk_delay_ms: default_next_chunk_delay_ms(),
            chunk_queue_capacity: default_chunk_queue_capacity(),
        }
    }
}

impl StreamingConfig {
    pub fn first_chunk_grace(&self) -> Duration {
        Duration::from_millis(self.first_chunk_grace_ms)
    }

    pub fn process_stream_delay(&self) -> Duration {
        Duration::from_millis(self.process_stream_delay_ms)
    }

    pub fn next_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.next_chunk_delay_ms)
    }

    /// Queue capacity, never zero (`tokio::sync::mpsc` rejects zero).
    pub fn queue_capacity(&self) -> usize {
        self.chunk_queue_capacity.max(1)
    }
}
