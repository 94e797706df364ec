//! Fixed texts spoken to the caller when the normal reply path fails.

/// Spoken when a completion stream produced no text at all.
pub const FALLBACK_TEXT: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again.";

/// Spoken when producing a streamed reply failed part-way.
pub const APOLOGY_TEXT: &str = "I'm sorry, there was an error processing your request.";

/// Spoken when a blocking completion request failed outright.
pub const COMPLETION_ERROR_TEXT: &str =
    "I'm sorry, I'm experiencing technical difficulties. Please try again later.";

/// Spoken when the completion response carried no message content.
pub const NOT_UNDERSTOOD_TEXT: &str = "I'm sorry, I didn't understand that. Could you please try again?";

/// Spoken when speech recognition delivered nothing usable.
pub const UNRECOGNIZED_TEXT: &str = "I didn't understand what you said. Please try again.";
