//! # sync-client
//!
//! Async runtime pieces for Skirmish multiplayer sync.
//!
//! Two peers run the same deterministic engine. Each uploads the actions its
//! own seat takes to an ordered command log; the log gives every command a
//! global sequence id and pushes it to both peers. On each peer, the remote
//! seat is driven by a [`NetworkController`] that feeds the engine the log's
//! commands in sequence order.
//!
//! ## Components
//!
//! - [`CommandBuffer`]: remote commands keyed by sequence id, with waits
//! - [`NetworkController`]: answers the engine's turn requests for the remote seat
//! - [`NetworkSync`]: uploads local actions, routes remote entries, checks checksums
//! - [`CommandLog`]: the ordered log seam ([`MemoryLog`] for tests)
//! - [`Engine`]: the deterministic engine seam ([`MockEngine`] for tests)
//! - [`SessionManager`] / [`GameSession`]: create, join and run a session
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{GameSession, SessionManager, SyncConfig};
//!
//! let manager = SessionManager::new(log.clone(), SyncConfig::default());
//! let setup = manager.create_session(PlayerId::ZERO, my_deck, their_deck, None).await?;
//! println!("join code: {}", setup.context.join_code.as_ref().unwrap());
//!
//! let mut session = GameSession::new(setup.context, log, engine);
//! session.start().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod log;
pub mod session;
pub mod subscription;
pub mod sync;

pub use buffer::{BufferError, CommandBuffer};
pub use config::{SyncConfig, DEFAULT_WAIT_TIMEOUT};
pub use controller::NetworkController;
pub use engine::{Engine, EngineError, MockEngine};
pub use error::ClientError;
pub use events::SyncEvent;
pub use log::{
    ActionFeed, CommandLog, LogError, MemoryLog, SeatConfig, SessionDoc, SessionInfo,
    SessionStatus,
};
pub use session::{GameSession, SessionContext, SessionManager, SessionSetup};
pub use subscription::Subscription;
pub use sync::{CatchUp, NetworkSync};
