//! Error types for the checkpoint evaluation scheduler

use thiserror::Error;

/// Result type alias using the evaluation Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the checkpoint evaluation scheduler
#[derive(Error, Debug)]
pub enum Error {
    // Checkpoint errors
    #[error("Checkpoint load failed: {path} - {reason}")]
    CheckpointLoad { path: String, reason: String },

    #[error("Checkpoint scan failed: {path} - {message}")]
    Scan { path: String, message: String },

    // Ledger errors
    #[error("Ledger I/O error: {path} - {message}")]
    LedgerIo { path: String, message: String },

    #[error("Ledger append for epoch {epoch} failed after {attempts} attempts: {message}")]
    LedgerAppendExhausted {
        epoch: String,
        attempts: u32,
        message: String,
    },

    // Evaluation errors
    #[error("Evaluation failed for epoch {epoch}: {message}")]
    Evaluation { epoch: String, message: String },

    #[error("Metrics sink error: {message}")]
    MetricsSink { message: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LedgerIo { .. } | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::ConfigParse(e.to_string())
    }
}
