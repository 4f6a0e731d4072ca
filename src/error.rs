//! # Error Types
//!
//! Custom error types for Emon Uplink using `thiserror`.

use thiserror::Error;

/// Main error type for Emon Uplink
#[derive(Debug, Error)]
pub enum UplinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a log file or remote response
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key, IV or padding problems in the codec
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// HTTP collaborator could not open or send a request
    #[error("HTTP error: {0}")]
    Http(String),

    /// Remote answered with something we cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Log store is empty, closed or out of order
    #[error("Log store error: {0}")]
    Log(String),
}

/// Result type alias for Emon Uplink
pub type Result<T> = std::result::Result<T, UplinkError>;
