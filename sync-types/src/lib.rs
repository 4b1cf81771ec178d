//! # sync-types
//!
//! Wire format types for the Skirmish multiplayer command log.
//!
//! This crate provides the foundational types used across all sync crates:
//! - [`PlayerId`], [`SequenceId`], [`SessionId`], [`ActionId`] - Identity and ordering types
//! - [`Command`] / [`Action`] - One player decision, as stored in the log
//! - [`LogEntry`] - A command together with its log-assigned sequence id
//! - [`TurnRequest`], [`DesyncEvent`] - Engine and verification events
//! - [`StateChecksum`] - Digest used to compare engine state between peers
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod checksum;
mod command;
mod error;
mod event;
mod ids;

pub use checksum::StateChecksum;
pub use command::{Action, Command, LogEntry, SlotCoord};
pub use error::SyncError;
pub use event::{DesyncEvent, RequestKind, TurnRequest};
pub use ids::{ActionId, PlayerId, SequenceId, SessionId};
