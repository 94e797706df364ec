//! TwiML documents returned to the telephony platform.
//!
//! Every webhook answers with a `<Response>` telling the platform what to
//! say next and where to send the caller's next utterance or poll. Only the
//! handful of verbs the call flows need are modelled.

use axum::{
    http::header,
    response::{IntoResponse, Response},
};

pub const CALL_ANSWER_PATH: &str = "/api/call/answer";
pub const CALL_PROCESS_PATH: &str = "/api/call/process";
pub const STREAMING_ANSWER_PATH: &str = "/api/streaming/answer";
pub const STREAMING_PROCESS_PATH: &str = "/api/streaming/process";
pub const STREAMING_PROCESS_STREAM_PATH: &str = "/api/streaming/process-stream";
pub const STREAMING_NEXT_CHUNK_PATH: &str = "/api/streaming/next-chunk";

const STREAMING_VOICE: &str = "alice";

const WELCOME_TEXT: &str =
    "Hello! I'm your AI voice assistant. Please say something to get started.";
const NO_INPUT_TEXT: &str = "I didn't hear anything. Please try calling back.";
const FOLLOW_UP_TEXT: &str = "What else would you like to know?";
const STREAMING_FOLLOW_UP_TEXT: &str = "What else can I help you with?";
const SIGN_OFF_TEXT: &str = "Thank you for using the voice assistant. Goodbye!";
const STREAMING_SIGN_OFF_TEXT: &str = "Thank you for calling. Have a great day!";
const GOODBYE_TEXT: &str = "Thank you for using the AI voice assistant. Have a great day!";
const PROCESSING_TEXT: &str = "Let me process that for you.";

#[derive(Debug, Clone, PartialEq)]
enum Verb {
    Say {
        text: String,
        voice: Option<&'static str>,
    },
    Gather {
        action: String,
        speech_timeout: u32,
        timeout: u32,
        prompt: String,
        voice: Option<&'static str>,
    },
    Redirect(String),
    Hangup,
}

/// A TwiML `<Response>` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say {
            text: text.into(),
            voice: None,
        });
        self
    }

    pub fn say_with_voice(mut self, text: impl Into<String>, voice: &'static str) -> Self {
        self.verbs.push(Verb::Say {
            text: text.into(),
            voice: Some(voice),
        });
        self
    }

    /// Collects speech and posts the transcript to `action`.
    pub fn gather_speech(
        mut self,
        action: impl Into<String>,
        speech_timeout: u32,
        timeout: u32,
        prompt: impl Into<String>,
        voice: Option<&'static str>,
    ) -> Self {
        self.verbs.push(Verb::Gather {
            action: action.into(),
            speech_timeout,
            timeout,
            prompt: prompt.into(),
            voice,
        });
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect(url.into()));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            match verb {
                Verb::Say { text, voice } => push_say(&mut xml, text, *voice),
                Verb::Gather {
                    action,
                    speech_timeout,
                    timeout,
                    prompt,
                    voice,
                } => {
                    xml.push_str(&format!(
                        r#"<Gather input="speech" action="{}" method="POST" speechTimeout="{}" timeout="{}">"#,
                        escape_xml(action),
                        speech_timeout,
                        timeout
                    ));
                    push_say(&mut xml, prompt, *voice);
                    xml.push_str("</Gather>");
                }
                Verb::Redirect(url) => {
                    xml.push_str(&format!(
                        r#"<Redirect method="POST">{}</Redirect>"#,
                        escape_xml(url)
                    ));
                }
                Verb::Hangup => xml.push_str("<Hangup/>"),
            }
        }
        xml.push_str("</Response>");
        xml
    }
}

fn push_say(xml: &mut String, text: &str, voice: Option<&str>) {
    match voice {
        Some(voice) => xml.push_str(&format!(
            r#"<Say voice="{}">{}</Say>"#,
            voice,
            escape_xml(text)
        )),
        None => xml.push_str(&format!("<Say>{}</Say>", escape_xml(text))),
    }
}

impl IntoResponse for VoiceResponse {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.to_xml()).into_response()
    }
}

/// Escapes text for use in element content or a double-quoted attribute.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// URL of the follow-up poll for `call_id`.
pub fn next_chunk_url(call_id: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(call_id.as_bytes()).collect();
    format!("{}?callSid={}", STREAMING_NEXT_CHUNK_PATH, encoded)
}

/// Greets a new caller and listens for their first utterance.
pub fn welcome(process_path: &str) -> VoiceResponse {
    VoiceResponse::new()
        .gather_speech(process_path, 3, 10, WELCOME_TEXT, None)
        .say(NO_INPUT_TEXT)
        .hangup()
}

/// Speaks a complete reply and listens for the next utterance.
pub fn continue_conversation(reply: &str) -> VoiceResponse {
    VoiceResponse::new()
        .say(reply)
        .gather_speech(CALL_PROCESS_PATH, 2, 8, FOLLOW_UP_TEXT, None)
        .say(SIGN_OFF_TEXT)
        .hangup()
}

/// Speaks `message` and sends the caller back to `answer_path`.
pub fn error(message: &str, answer_path: &str) -> VoiceResponse {
    VoiceResponse::new().say(message).redirect(answer_path)
}

pub fn goodbye() -> VoiceResponse {
    VoiceResponse::new().say(GOODBYE_TEXT).hangup()
}

/// Acknowledges the utterance while the reply is produced.
pub fn streaming_processing() -> VoiceResponse {
    VoiceResponse::new()
        .say_with_voice(PROCESSING_TEXT, STREAMING_VOICE)
        .redirect(STREAMING_PROCESS_STREAM_PATH)
}

/// Speaks one chunk of a streamed reply.
///
/// A blank chunk is not spoken. Unless the reply is complete the caller is
/// redirected to the next poll.
pub fn streaming_chunk(chunk: &str, complete: bool, call_id: &str) -> VoiceResponse {
    let mut response = VoiceResponse::new();
    if !chunk.trim().is_empty() {
        response = response.say_with_voice(chunk, STREAMING_VOICE);
    }

    if complete {
        response
            .gather_speech(
                STREAMING_PROCESS_PATH,
                2,
                8,
                FOLLOW_UP_TEXT,
                Some(STREAMING_VOICE),
            )
            .say(SIGN_OFF_TEXT)
            .hangup()
    } else {
        response.redirect(next_chunk_url(call_id))
    }
}

/// Ends a streamed turn that has nothing left to say.
pub fn streaming_complete() -> VoiceResponse {
    VoiceResponse::new()
        .gather_speech(
            STREAMING_PROCESS_PATH,
            2,
            8,
            STREAMING_FOLLOW_UP_TEXT,
            Some(STREAMING_VOICE),
        )
        .say(STREAMING_SIGN_OFF_TEXT)
        .hangup()
}
