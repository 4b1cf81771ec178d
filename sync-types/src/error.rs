//! Error types for the sync wire format.

use thiserror::Error;

/// Errors that can occur while encoding or validating sync types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Seat number outside the two-seat table
    #[error("invalid player id: {0}")]
    InvalidPlayer(u8),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
