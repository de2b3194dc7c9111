//! Engine and runner error types.

use thiserror::Error;

/// Errors surfaced by deploy engines and test runners.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("command failed: {0}")]
    Command(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("values serialization error: {0}")]
    Values(#[from] serde_json::Error),

    #[error("runner {runner} rejected trigger: {detail}")]
    Trigger { runner: String, detail: String },

    #[error("unexpected response from {runner}: {detail}")]
    UnexpectedResponse { runner: String, detail: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
