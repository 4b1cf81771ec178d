//! CommandBuffer - remote commands keyed by sequence id.
//!
//! The network side fills the buffer as log entries arrive, in whatever
//! order and at whatever pace the network delivers them. The controller
//! drains it strictly in sequence order by waiting on the next id it needs.
//!
//! # Guarantees
//!
//! - Entries are write-once: re-adding an id fails with
//!   [`BufferError::Duplicate`] and leaves the first command in place.
//! - A waiter resolves exactly once: with the command, or with
//!   [`BufferError::Reset`] if the buffer is cleared first.
//! - Checking for a command and registering a waiter happen under one lock,
//!   so an `add_command` racing a `wait_for_command` can never be missed.
//!
//! The lock is a `std::sync::Mutex` and is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sync_types::{Command, SequenceId};
use thiserror::Error;
use tokio::sync::oneshot;

/// Buffer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// A command is already stored at this id.
    #[error("command {0} already buffered")]
    Duplicate(SequenceId),

    /// The buffer was cleared while waiting.
    #[error("buffer reset while waiting for command {0}")]
    Reset(SequenceId),

    /// A bounded wait expired.
    #[error("timed out waiting for command {seq}")]
    TimedOut {
        /// The id that never arrived.
        seq: SequenceId,
    },
}

type Waiter = oneshot::Sender<Result<Command, BufferError>>;

#[derive(Debug, Default)]
struct BufferInner {
    commands: HashMap<SequenceId, Command>,
    waiters: HashMap<SequenceId, Vec<Waiter>>,
}

/// Shared buffer of remote commands.
///
/// Cloning is cheap; all clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct CommandBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

impl CommandBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        // A panic elsewhere cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `command` at `seq` and wake everyone waiting for it.
    pub fn add_command(&self, seq: SequenceId, command: Command) -> Result<(), BufferError> {
        let mut inner = self.lock();

        if inner.commands.contains_key(&seq) {
            return Err(BufferError::Duplicate(seq));
        }

        if let Some(waiters) = inner.waiters.remove(&seq) {
            for waiter in waiters {
                // Receiver gone means the wait was cancelled.
                let _ = waiter.send(Ok(command.clone()));
            }
        }
        inner.commands.insert(seq, command);
        Ok(())
    }

    /// Non-blocking lookup.
    pub fn get_command(&self, seq: SequenceId) -> Option<Command> {
        self.lock().commands.get(&seq).cloned()
    }

    /// Check if a command is stored at `seq`.
    pub fn has_command(&self, seq: SequenceId) -> bool {
        self.lock().commands.contains_key(&seq)
    }

    /// Wait until a command is stored at `seq`.
    ///
    /// Resolves immediately if it is already present. Waits forever
    /// otherwise; use [`wait_for_command_timeout`](Self::wait_for_command_timeout)
    /// for a bounded wait.
    pub async fn wait_for_command(&self, seq: SequenceId) -> Result<Command, BufferError> {
        let rx = {
            let mut inner = self.lock();
            if let Some(command) = inner.commands.get(&seq) {
                return Ok(command.clone());
            }

            let (tx, rx) = oneshot::channel();
            let waiters = inner.waiters.entry(seq).or_default();
            waiters.retain(|w| !w.is_closed());
            waiters.push(tx);
            rx
        };

        // The sender only disappears without sending if the whole buffer is
        // dropped, which is a reset as far as the waiter can tell.
        rx.await.unwrap_or(Err(BufferError::Reset(seq)))
    }

    /// Like [`wait_for_command`](Self::wait_for_command), giving up after `timeout`.
    pub async fn wait_for_command_timeout(
        &self,
        seq: SequenceId,
        timeout: Duration,
    ) -> Result<Command, BufferError> {
        tokio::time::timeout(timeout, self.wait_for_command(seq))
            .await
            .map_err(|_| BufferError::TimedOut { seq })?
    }

    /// Drop every stored command and reject every pending waiter.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.commands.clear();
        for (seq, waiters) in inner.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(BufferError::Reset(seq)));
            }
        }
    }

    /// Number of stored commands.
    pub fn size(&self) -> usize {
        self.lock().commands.len()
    }

    /// Check if no commands are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().commands.is_empty()
    }

    /// Number of live waiters (cancelled waits are not counted).
    pub fn pending_waiters(&self) -> usize {
        self.lock()
            .waiters
            .values()
            .flatten()
            .filter(|w| !w.is_closed())
            .count()
    }
}
