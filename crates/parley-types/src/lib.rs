//! Shared types and constants for the Parley voice assistant.
//!
//! This crate provides the vocabulary used by every other Parley crate:
//! conversation roles and turns, call status codes, the chunk boundary
//! characters that decide where spoken output may be split, and the
//! user-facing texts spoken when something goes wrong upstream.
//!
//! Its only runtime dependency is `serde`, so the completion client,
//! the streaming coordinator and the HTTP server can all share it without
//! pulling each other in.

use serde::{Deserialize, Serialize};
use std::fmt;

mod speech;
pub use speech::{
    APOLOGY_TEXT, COMPLETION_ERROR_TEXT, FALLBACK_TEXT, NOT_UNDERSTOOD_TEXT, UNRECOGNIZED_TEXT,
};

/// Characters on which a reply may be cut into a spoken chunk.
///
/// A chunk ends on one of these so that the text-to-speech engine never
/// receives half a word.
pub const CHUNK_BOUNDARIES: [char; 4] = [' ', '.', '!', '?'];

/// Returns `true` if `c` terminates a word or a sentence.
pub fn is_chunk_boundary(c: char) -> bool {
    CHUNK_BOUNDARIES.contains(&c)
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller.
    User,
    /// The language model.
    Assistant,
}

impl Role {
    /// Returns the role name used by chat-completion APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a call's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub text: String,
}

impl Turn {
    /// A turn spoken by the caller.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// A turn produced by the assistant.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Lifecycle status of a phone call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// The call is in progress.
    #[default]
    Active,
    /// The caller hung up or the call was ended explicitly.
    Ended,
}
