//! Error types for foenixmgr.

use std::io;
use thiserror::Error;

/// Result type for foenixmgr operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for foenixmgr operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Transport could not be opened, or the peer went away.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed request, short write or unsynchronised response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid firmware image.
    #[error("Invalid image: {0}")]
    Format(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A destructive operation was declined at confirmation.
    #[error("Aborted: {0}")]
    Aborted(String),
}
