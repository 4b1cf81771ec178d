//! Events exchanged with the engine and surfaced to the host.

use serde::{Deserialize, Serialize};

use crate::{PlayerId, SequenceId};

/// Kind of decision the engine is asking a seat for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    /// Play a card, activate, or finish the turn.
    ActionRequired,
    /// Answer a targeting or option prompt.
    InputRequired,
}

/// The engine asking one seat for its next decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Event type on the wire (`ACTION_REQUIRED` / `INPUT_REQUIRED`).
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Seat that must decide.
    pub player_id: PlayerId,
}

impl TurnRequest {
    /// An `ACTION_REQUIRED` request for `player_id`.
    pub fn action(player_id: PlayerId) -> Self {
        Self {
            kind: RequestKind::ActionRequired,
            player_id,
        }
    }

    /// An `INPUT_REQUIRED` request for `player_id`.
    pub fn input(player_id: PlayerId) -> Self {
        Self {
            kind: RequestKind::InputRequired,
            player_id,
        }
    }
}

/// Two peers computed different state after applying the same sequence id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "DESYNC_DETECTED", rename_all = "camelCase")]
pub struct DesyncEvent {
    /// The command after which the states diverged.
    pub sequence_id: SequenceId,
    /// Checksum the author reported.
    pub expected: String,
    /// Checksum computed locally.
    pub actual: String,
}
