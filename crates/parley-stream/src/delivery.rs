use crate::coordinator::{ChunkPoll, StreamCoordinator};
use std::time::Duration;
use tracing::debug;

/// What one poll request should tell the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStep {
    /// Speak `chunk`. If `end_of_turn` is set the reply is complete and the
    /// caller gets the next prompt; otherwise poll again.
    Speak { chunk: String, end_of_turn: bool },
    /// Nothing to say yet, the reply is still being produced.
    Wait,
    /// Nothing left to say; prompt the caller for their next utterance.
    EndOfTurn,
}

impl DeliveryStep {
    pub fn ends_turn(&self) -> bool {
        match self {
            Self::Speak { end_of_turn, .. } => *end_of_turn,
            Self::Wait => false,
            Self::EndOfTurn => true,
        }
    }
}

/// Drives one streaming turn from stateless poll requests.
///
/// Each step dequeues at most one chunk. When a step ends the turn, the
/// streaming session is cleaned up before the step is returned.
#[derive(Clone)]
pub struct DeliveryLoop {
    coordinator: StreamCoordinator,
}

impl DeliveryLoop {
    pub fn new(coordinator: StreamCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn step(&self, call_id: &str) -> DeliveryStep {
        let ChunkPoll { chunk, complete } = self.coordinator.poll(call_id);
        let step = match chunk {
            Some(chunk) => DeliveryStep::Speak {
                chunk,
                end_of_turn: complete,
            },
            None if complete => DeliveryStep::EndOfTurn,
            None => DeliveryStep::Wait,
        };

        if step.ends_turn() {
            self.coordinator.cleanup(call_id);
        }
        debug!(call_id, ?step, "delivery step");
        step
    }

    /// Waits `delay`, then takes one step.
    pub async fn step_after(&self, call_id: &str, delay: Duration) -> DeliveryStep {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.step(call_id)
    }
}
