//! Error types for the playback engine.
//!
//! One crate-wide error enum via thiserror; callers that only care about
//! the broad category match on the variant, everything else goes through
//! `Display`.

use thiserror::Error;

/// Main error type for hopradio-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog parsing or validation errors
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Offline cache database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP transport and status errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
