//! Identity and ordering types for the command log.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SyncError;

/// A seat at the table.
///
/// The game is strictly two-player, so only seats 0 and 1 exist. On the
/// wire a seat is a bare integer (`"playerId": 1`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PlayerId(u8);

impl PlayerId {
    /// The seat that creates the session.
    pub const ZERO: PlayerId = PlayerId(0);
    /// The second seat.
    pub const ONE: PlayerId = PlayerId(1);

    /// Create a PlayerId, rejecting seats other than 0 and 1.
    pub fn new(seat: u8) -> Option<Self> {
        match seat {
            0 | 1 => Some(Self(seat)),
            _ => None,
        }
    }

    /// Seat number as an array index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// The seat across the table.
    pub fn opponent(&self) -> Self {
        Self(1 - self.0)
    }

    /// Both seats in table order.
    pub fn all() -> [PlayerId; 2] {
        [Self::ZERO, Self::ONE]
    }
}

impl TryFrom<u8> for PlayerId {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PlayerId::new(value).ok_or(SyncError::InvalidPlayer(value))
    }
}

impl From<PlayerId> for u8 {
    fn from(id: PlayerId) -> u8 {
        id.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player({})", self.0)
    }
}

/// Position of a command in the session's single global order.
///
/// Assigned by the log's atomic counter, never by clients. The first
/// command of a session is sequence 0, and no two commands in a session
/// ever share an id, whichever seat produced them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SequenceId(u64);

impl SequenceId {
    /// Create a new SequenceId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this SequenceId.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The first id of every session.
    pub fn zero() -> Self {
        Self(0)
    }

    /// The id immediately after this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

/// A unique identifier for a game session in the log.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Create a new random SessionId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a SessionId from its hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidData(format!("session id: {e}")))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", &self.0.to_string()[..8])
    }
}

/// A client-minted identifier for one locally applied action.
///
/// UUID v4 format. The log deduplicates appends on this id, which is what
/// makes retrying a failed upload safe.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(uuid::Uuid);

impl ActionId {
    /// Create a new random ActionId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse an ActionId from its hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidData(format!("action id: {e}")))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({})", self.0)
    }
}
