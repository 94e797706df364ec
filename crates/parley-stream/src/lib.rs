//! Call state and streamed reply delivery for Parley.
//!
//! - [`CallSessionStore`] keeps each call's conversation history for the
//!   lifetime of the call.
//! - [`StreamCoordinator`] runs one background producer per caller turn and
//!   buffers its reply as spoken chunks.
//! - [`DeliveryLoop`] turns a sequence of stateless poll requests into an
//!   ordered drain of those chunks, and decides when the turn is over.

pub mod calls;
pub mod config;
pub mod coordinator;
pub mod delivery;

pub use calls::{CallSession, CallSessionStore};
pub use config::StreamingConfig;
pub use coordinator::{ChunkPoll, StreamCoordinator, StreamPhase};
pub use delivery::{DeliveryLoop, DeliveryStep};
