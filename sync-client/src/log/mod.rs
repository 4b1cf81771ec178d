//! Ordered command log abstraction.
//!
//! The log is the single source of ordering truth for a session. Any
//! implementation must provide:
//! - **Atomic sequencing**: `append_action()` reads and increments one
//!   per-session counter; concurrent appends never share an id.
//! - **Idempotent append**: re-appending a command whose `action_id` is
//!   already in the session returns the id it was first given.
//! - **Ordered push delivery**: a feed from `subscribe_actions()` yields
//!   the existing history and then every new entry, in ascending sequence
//!   order, with no gaps or duplicates. The appending client gets its own
//!   entries too (echo).
//! - **Full-history read**: `get_all_actions()`.
//!
//! [`MemoryLog`] is the in-process implementation used in tests. The
//! relay crate provides a SQLite-backed one.

mod memory;

#[cfg(any(test, feature = "test-util"))]
pub mod contract;

pub use memory::MemoryLog;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use sync_core::JoinCode;
use sync_types::{Command, LogEntry, PlayerId, SequenceId, SessionId, SyncError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Log errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// No session with this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// No session with this join code.
    #[error("no session with join code {0}")]
    JoinCodeNotFound(String),

    /// The append was not accepted.
    #[error("append failed: {0}")]
    AppendFailed(String),

    /// The log could not be reached. The operation may or may not have
    /// taken effect.
    #[error("log unavailable: {0}")]
    Unavailable(String),

    /// Backing storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] SyncError),
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, waiting for both seats to be ready.
    Waiting,
    /// Both seats ready; play is underway.
    Active,
    /// The game is over.
    Completed,
}

impl SessionStatus {
    /// Name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    /// Parse a stored name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(SessionStatus::Waiting),
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// Per-seat setup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatConfig {
    /// Card ids of the seat's deck, in deck order.
    pub deck_ids: Vec<String>,
}

impl SeatConfig {
    /// Seat using the given deck.
    pub fn new(deck_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            deck_ids: deck_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// The session document: everything both peers agree on besides the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDoc {
    /// Session id.
    pub session_id: SessionId,
    /// Seed for the deterministic engine.
    pub seed: u64,
    /// Code the second player joins with.
    pub join_code: String,
    /// Setup per seat, indexed by player id.
    pub seats: [SeatConfig; 2],
    /// Ready flag per seat.
    pub ready: [bool; 2],
    /// Set once both seats have been ready.
    pub started: bool,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Unix milliseconds at creation.
    pub created_at: u64,
    /// The id the next append will receive.
    pub next_sequence: SequenceId,
}

impl SessionDoc {
    /// A fresh session, nobody ready yet.
    pub fn new(
        session_id: SessionId,
        seed: u64,
        join_code: &JoinCode,
        seats: [SeatConfig; 2],
        created_at: u64,
    ) -> Self {
        Self {
            session_id,
            seed,
            join_code: join_code.to_string(),
            seats,
            ready: [false; 2],
            started: false,
            status: SessionStatus::Waiting,
            created_at,
            next_sequence: SequenceId::zero(),
        }
    }

    /// Check if both seats are ready.
    pub fn both_ready(&self) -> bool {
        self.ready.iter().all(|r| *r)
    }

    /// Mark a seat ready. Starts the session when this makes both ready.
    ///
    /// Returns true if this call started the session.
    pub fn mark_ready(&mut self, player: PlayerId) -> bool {
        self.ready[player.index()] = true;
        if self.both_ready() && !self.started {
            self.started = true;
            self.status = SessionStatus::Active;
            return true;
        }
        false
    }
}

/// What `create_session()` hands back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// The new session.
    pub session_id: SessionId,
    /// Code to give the other player.
    pub join_code: JoinCode,
}

/// A live feed of log entries: history first, then new appends.
///
/// Dropping the feed unsubscribes.
#[derive(Debug)]
pub struct ActionFeed {
    rx: mpsc::UnboundedReceiver<LogEntry>,
    forwarder: Option<JoinHandle<()>>,
}

impl ActionFeed {
    /// Feed reading straight from a channel.
    pub fn new(rx: mpsc::UnboundedReceiver<LogEntry>) -> Self {
        Self {
            rx,
            forwarder: None,
        }
    }

    /// Feed filled by a background task, aborted when the feed is dropped.
    pub fn with_forwarder(rx: mpsc::UnboundedReceiver<LogEntry>, forwarder: JoinHandle<()>) -> Self {
        Self {
            rx,
            forwarder: Some(forwarder),
        }
    }

    /// Next entry, or `None` once the log closes the feed.
    pub async fn next(&mut self) -> Option<LogEntry> {
        self.rx.recv().await
    }

    /// Next entry if one is already queued.
    pub fn try_next(&mut self) -> Option<LogEntry> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ActionFeed {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Ordered command log for game sessions.
#[async_trait]
pub trait CommandLog: Send + Sync + 'static {
    /// Create a session with a fresh join code.
    async fn create_session(
        &self,
        seed: u64,
        seats: [SeatConfig; 2],
    ) -> Result<SessionInfo, LogError>;

    /// Read the session document.
    async fn get_session(&self, session_id: SessionId) -> Result<SessionDoc, LogError>;

    /// Look up a session by join code.
    async fn find_session_by_join_code(&self, code: &JoinCode) -> Result<SessionId, LogError>;

    /// Append a command; returns the sequence id assigned to it.
    async fn append_action(
        &self,
        session_id: SessionId,
        command: &Command,
    ) -> Result<SequenceId, LogError>;

    /// Subscribe to the session's entries, history first.
    async fn subscribe_actions(&self, session_id: SessionId) -> Result<ActionFeed, LogError>;

    /// Every entry in the session, ascending by sequence id.
    async fn get_all_actions(&self, session_id: SessionId) -> Result<Vec<LogEntry>, LogError>;

    /// Mark a seat ready; returns the updated document.
    async fn set_seat_ready(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
    ) -> Result<SessionDoc, LogError>;

    /// Watch the session document as seats become ready and status changes.
    async fn subscribe_ready_state(
        &self,
        session_id: SessionId,
    ) -> Result<watch::Receiver<SessionDoc>, LogError>;

    /// Set the session's lifecycle status.
    async fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> Result<(), LogError>;
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
