//! # sync-relay
//!
//! SQLite-backed ordered command log for Skirmish.
//!
//! This crate implements [`sync_client::CommandLog`] on a database shared by
//! both players of a session:
//! - Assigns each session's sequence ids atomically with the insert
//! - Answers client retries with the entry already stored
//! - Delivers history, then live appends, to every subscriber
//! - Publishes seat readiness and session status to watchers
//!
//! ## Architecture
//!
//! ```text
//! Player A ──┐                        ┌── Player B
//!            │   append / subscribe   │
//!            ├───────────────────────►│
//!            │                        │
//!        ┌───┴────────────────────────┴───┐
//!        │           SyncRelay            │
//!        │  per-session hub (broadcast)   │
//!        │  ┌──────────────────────────┐  │
//!        │  │ SQLite (sessions, log)   │  │
//!        │  └──────────────────────────┘  │
//!        └────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod server;
pub mod storage;

pub use cleanup::spawn_cleanup_task;
pub use config::{CleanupConfig, Config, ConfigError, DeliveryConfig, StorageConfig};
pub use error::{RelayError, StorageError};
pub use server::{RelayMetrics, SyncRelay};
pub use storage::{ActionStorage, Appended, SqliteStorage};
