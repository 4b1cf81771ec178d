//! Client-side sync configuration.

use std::time::Duration;

/// Default bound on waiting for a remote command.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a sync session.
///
/// Built with `with_*` methods on top of [`SyncConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long a remote-seat controller waits for the next command before
    /// reporting the connection as degraded. It keeps waiting afterwards.
    /// `None` waits forever without reporting.
    pub wait_timeout: Option<Duration>,
    /// Append attempts per command before an `UploadFailed` event.
    pub upload_max_attempts: u32,
    /// Base delay for exponential upload retry backoff.
    pub upload_retry_base: Duration,
    /// Maximum local commands queued or in flight.
    pub upload_queue_capacity: usize,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Some(DEFAULT_WAIT_TIMEOUT),
            upload_max_attempts: 5,
            upload_retry_base: Duration::from_millis(200),
            upload_queue_capacity: 1024,
            event_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bound on waiting for a remote command.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Wait for remote commands forever.
    pub fn with_unbounded_wait(mut self) -> Self {
        self.wait_timeout = None;
        self
    }

    /// Set append attempts per command (at least 1).
    pub fn with_upload_attempts(mut self, attempts: u32) -> Self {
        self.upload_max_attempts = attempts.max(1);
        self
    }

    /// Set the base retry delay.
    pub fn with_upload_retry_base(mut self, base: Duration) -> Self {
        self.upload_retry_base = base;
        self
    }

    /// Set the upload queue capacity.
    pub fn with_upload_queue_capacity(mut self, capacity: usize) -> Self {
        self.upload_queue_capacity = capacity;
        self
    }

    /// Set the event channel capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
