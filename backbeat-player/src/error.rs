//! Error types for backbeat-player
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.

use thiserror::Error;

/// Main error type for backbeat-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command arrived while a state transition was in progress.
    /// The caller should retry; nothing was queued.
    #[error("{0}")]
    Busy(String),

    /// Operation not valid in the current playback mode
    #[error("{0}")]
    InvalidState(String),

    /// Decoder subprocess failed for the current source (recoverable:
    /// the offending song is skipped)
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Decoder executable is absent, so no song can ever play.
    /// Propagates out of the player loop and terminates the controller.
    #[error("Decoder executable not found: {0}")]
    DecoderMissing(String),

    /// Media resolution failed for a user-supplied URL
    #[error("Failed to resolve media: {0}")]
    Resolve(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error must terminate the whole controller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DecoderMissing(_))
    }
}

/// Convenience Result type using backbeat-player Error
pub type Result<T> = std::result::Result<T, Error>;
