//! Storage layer for sync-relay.
//!
//! Sessions and their command logs, with the per-session sequence counter
//! kept next to the session row so assignment and insert commit together.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use sync_client::{SessionDoc, SessionStatus};
use sync_types::{Command, LogEntry, PlayerId, SequenceId, SessionId};

/// Result of appending a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    /// The stored entry.
    pub entry: LogEntry,
    /// False if the command was already in the log and nothing was written.
    pub created: bool,
}

/// Trait for command log storage backends.
#[async_trait]
pub trait ActionStorage: Send + Sync {
    /// Insert a new session.
    ///
    /// Returns false, writing nothing, if the join code is already taken.
    async fn insert_session(&self, doc: &SessionDoc) -> Result<bool, StorageError>;

    /// Load a session document.
    async fn get_session(&self, session_id: SessionId) -> Result<SessionDoc, StorageError>;

    /// Look up a session by its (upper-case) join code.
    async fn find_by_join_code(&self, code: &str) -> Result<Option<SessionId>, StorageError>;

    /// Append a command, assigning the session's next sequence id.
    ///
    /// A command whose action id is already in the session is not stored
    /// again; its existing entry is returned.
    async fn append_action(
        &self,
        session_id: SessionId,
        command: &Command,
        timestamp: u64,
    ) -> Result<Appended, StorageError>;

    /// Entries with sequence id `from` or later, ascending.
    async fn get_actions_from(
        &self,
        session_id: SessionId,
        from: SequenceId,
    ) -> Result<Vec<LogEntry>, StorageError>;

    /// Mark a seat ready, starting the session when both are. Returns the
    /// updated document.
    async fn set_seat_ready(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
    ) -> Result<SessionDoc, StorageError>;

    /// Set a session's status. Returns the updated document.
    async fn update_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> Result<SessionDoc, StorageError>;

    /// Delete completed sessions last touched at or before `completed_before`
    /// and any session last touched at or before `idle_before` (Unix
    /// milliseconds), with their entries.
    ///
    /// Returns the deleted session ids.
    async fn delete_stale_sessions(
        &self,
        completed_before: u64,
        idle_before: u64,
    ) -> Result<Vec<SessionId>, StorageError>;
}
