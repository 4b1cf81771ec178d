//! # sync-core
//!
//! Pure ordering logic for Skirmish multiplayer sync (no I/O, instant tests).
//!
//! This crate implements the state machines and bookkeeping behind the
//! command-log synchronization without any network, disk, or async runtime,
//! enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`CommandCursor`] / [`SequenceTracker`] - where a consumer is in the global order
//! - [`DispatchMachine`] - a remote seat's turn-request handling, as transitions
//! - [`UploadQueue`] - locally applied commands awaiting a log-assigned id
//! - [`JoinCode`] - human-friendly session codes
//!
//! The actual I/O (waiting on the buffer, appending to the log, submitting to
//! the engine) is performed by `sync-client`, which interprets the actions
//! produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod dispatch;
pub mod join;
pub mod upload;

pub use cursor::{CommandCursor, Recorded, SequenceTracker};
pub use dispatch::{DispatchAction, DispatchEvent, DispatchMachine, DispatchState, Ticket};
pub use join::{JoinCode, JoinCodeError, JOIN_CODE_ALPHABET, JOIN_CODE_LEN};
pub use upload::{retry_delay, PendingUpload, QueueError, UploadQueue};
