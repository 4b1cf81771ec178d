//! Engine abstraction for Skirmish sync.
//!
//! The deterministic rules engine is an external collaborator. Sync only
//! needs four things from it:
//! - `submit_action()` / `submit_input()` feed a remote seat's decision in
//! - `turn_requests()` says whose decision the engine needs next
//! - `applied_actions()` reports every command applied to engine state
//!
//! Turn requests and applied actions are broadcast streams so the network
//! controller and the uploader can each hold their own receiver.

mod mock;

pub use mock::MockEngine;

use async_trait::async_trait;
use sync_types::{Command, PlayerId, TurnRequest};
use thiserror::Error;
use tokio::sync::broadcast;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine refused the command (illegal in the current state).
    #[error("engine rejected command: {0}")]
    Rejected(String),

    /// The engine has shut down.
    #[error("engine stopped")]
    Stopped,
}

/// The deterministic engine surface consumed by sync.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Apply a remote seat's action (PLAY_CARD, ACTIVATE, ACTIVATE_LEADER, DONE).
    async fn submit_action(&self, command: Command) -> Result<(), EngineError>;

    /// Apply a remote seat's answer to an input prompt.
    async fn submit_input(
        &self,
        player_id: PlayerId,
        input: serde_json::Value,
    ) -> Result<(), EngineError>;

    /// Subscribe to turn requests (ACTION_REQUIRED / INPUT_REQUIRED).
    fn turn_requests(&self) -> broadcast::Receiver<TurnRequest>;

    /// Subscribe to commands as they are applied to engine state.
    fn applied_actions(&self) -> broadcast::Receiver<Command>;
}
