//! Completion API client for Parley.
//!
//! Wraps an OpenAI-compatible chat-completion endpoint in two shapes:
//!
//! - [`TokenSource`] / [`OpenAiTokenSource`]: a streamed reply, decoded from
//!   server-sent events and coalesced into word- or sentence-bounded
//!   fragments that can be spoken as soon as they arrive.
//! - [`CompletionClient`]: a single blocking request returning the whole
//!   reply.
//!
//! Neither shape lets an upstream failure escape as a fault to the caller.
//! A rejected streaming request is an empty stream, and a failed blocking
//! request is a spoken apology.

pub mod assembler;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod source;
pub mod sse;

pub use assembler::{assemble, FragmentAssembler};
pub use client::CompletionClient;
pub use config::CompletionConfig;
pub use error::LlmError;
pub use source::{collect_completion, FragmentStream, OpenAiTokenSource, TokenSource};
