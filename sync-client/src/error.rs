//! Client error umbrella.

use crate::buffer::BufferError;
use crate::engine::EngineError;
use crate::log::LogError;
use sync_core::{JoinCodeError, QueueError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Log error.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Buffer error.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Upload queue error.
    #[error("upload error: {0}")]
    Upload(#[from] QueueError),

    /// Malformed join code.
    #[error("invalid join code: {0}")]
    JoinCode(#[from] JoinCodeError),

    /// The session has not been started, or was shut down.
    #[error("session not running")]
    NotRunning,

    /// The OS could not supply a random seed.
    #[error("no entropy for seed: {0}")]
    Entropy(String),

    /// The session was already started.
    #[error("session already started")]
    AlreadyStarted,
}
