//! Upload queue for locally authored commands.
//!
//! Every action the local seat applies must reach the shared log exactly
//! once. The queue provides:
//! - FIFO ordering, so the log sees the local seat's commands in the order
//!   they were applied
//! - Pending tracking (appends in flight but not yet confirmed)
//! - A max size so a dead log cannot grow memory without bound
//!
//! Appends are idempotent per [`ActionId`], so retrying a command whose
//! first attempt actually landed is harmless.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use sync_types::{ActionId, Command};
use thiserror::Error;

/// Upper bound on a single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity.
    #[error("upload queue full (capacity: {capacity})")]
    Full {
        /// Current queue capacity.
        capacity: usize,
    },
}

/// A command waiting to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    /// The command to append.
    pub command: Command,
    /// Number of append attempts made so far.
    pub attempts: u32,
}

impl PendingUpload {
    /// Wrap a freshly applied command.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            attempts: 0,
        }
    }

    /// The idempotency key of the wrapped command.
    pub fn action_id(&self) -> ActionId {
        self.command.action_id
    }
}

/// Upload queue with pending tracking.
///
/// Commands flow through the queue in this order:
/// 1. `enqueue()` - add to the queue
/// 2. `dequeue()` - remove from queue, move to pending, count an attempt
/// 3. `ack()` - remove from pending (append confirmed)
///
/// If an append fails, call `nack()` to move it back to the front.
#[derive(Debug)]
pub struct UploadQueue {
    /// Maximum number of commands (queued + pending).
    max_size: usize,
    /// Commands waiting to be appended.
    queue: VecDeque<PendingUpload>,
    /// Commands being appended.
    pending: HashMap<ActionId, PendingUpload>,
}

impl UploadQueue {
    /// Create a new queue with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            queue: VecDeque::new(),
            pending: HashMap::new(),
        }
    }

    /// Check if [`enqueue`](Self::enqueue) would refuse another command.
    pub fn is_full(&self) -> bool {
        self.total_count() >= self.max_size
    }

    /// Add a command to the back of the queue.
    pub fn enqueue(&mut self, command: Command) -> Result<(), QueueError> {
        if self.is_full() {
            return Err(QueueError::Full {
                capacity: self.max_size,
            });
        }
        self.queue.push_back(PendingUpload::new(command));
        Ok(())
    }

    /// Take the next command to append.
    ///
    /// The command moves to the pending set and its attempt count goes up.
    pub fn dequeue(&mut self) -> Option<PendingUpload> {
        let mut upload = self.queue.pop_front()?;
        upload.attempts += 1;
        self.pending.insert(upload.action_id(), upload.clone());
        Some(upload)
    }

    /// Confirm an append. Returns the finished upload, if it was pending.
    pub fn ack(&mut self, action_id: &ActionId) -> Option<PendingUpload> {
        self.pending.remove(action_id)
    }

    /// Put a failed append back at the front of the queue.
    pub fn nack(&mut self, action_id: &ActionId) {
        if let Some(upload) = self.pending.remove(action_id) {
            self.queue.push_front(upload);
        }
    }

    /// Drop a pending command that has exhausted its attempts.
    pub fn give_up(&mut self, action_id: &ActionId) -> Option<PendingUpload> {
        self.pending.remove(action_id)
    }

    /// Give every waiting command a fresh attempt budget.
    pub fn reset_attempts(&mut self) {
        for upload in self.queue.iter_mut() {
            upload.attempts = 0;
        }
    }

    /// Check if a command is mid-append.
    pub fn is_pending(&self, action_id: &ActionId) -> bool {
        self.pending.contains_key(action_id)
    }

    /// Number of commands waiting (not including pending).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending commands.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total number of commands (queued + pending).
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.pending.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }
}

/// Delay before retry number `attempt` (1-based).
///
/// `base * 2^(attempt-1)`, capped at [`MAX_RETRY_DELAY`], plus up to half of
/// `base` of random jitter so two peers retrying together drift apart.
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let backoff = base
        .saturating_mul(1u32 << exponent)
        .min(MAX_RETRY_DELAY);

    let jitter_cap = (base.as_millis() as u64) / 2;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        random_u64() % (jitter_cap + 1)
    };

    backoff + Duration::from_millis(jitter)
}

fn random_u64() -> u64 {
    let mut bytes = [0u8; 8];
    // No entropy means no jitter, not an error.
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes)
}
