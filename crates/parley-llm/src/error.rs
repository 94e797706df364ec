use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion API returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed completion response: {0}")]
    Malformed(String),
}
