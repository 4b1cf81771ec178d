//! Commands: the atomic player decisions carried by the log.
//!
//! A [`Command`] is what one seat decided (play a card, activate a unit,
//! answer an input prompt, or finish its turn). Commands are immutable once
//! appended; the log wraps each one in a [`LogEntry`] carrying the
//! sequence id it assigned.
//!
//! The wire shape is a flat JSON object, with the action's `type` tag and
//! fields inlined next to the seat:
//!
//! ```json
//! { "type": "PLAY_CARD", "cardId": "scout-2", "targetSlot": { "terrainId": 3, "playerId": 1 },
//!   "playerId": 1, "actionId": "…", "timestamp": 1705000000000 }
//! ```

use serde::{Deserialize, Serialize};

use crate::{ActionId, PlayerId, RequestKind, SequenceId, SyncError};

/// A board slot targeted by a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCoord {
    /// Terrain column (0-4).
    pub terrain_id: u8,
    /// Which side of the terrain.
    pub player_id: PlayerId,
}

/// The type-specific part of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    /// Play a card from hand.
    PlayCard {
        /// Card instance id.
        card_id: String,
        /// Where to deploy it, for cards that need a slot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_slot: Option<SlotCoord>,
    },
    /// Activate a unit's ability.
    Activate {
        /// Unit instance id.
        unit_id: String,
    },
    /// Use the seat's leader ability.
    ActivateLeader,
    /// Pass / finish acting for this turn.
    Done,
    /// Answer to an input prompt (target or option choice). The engine
    /// owns the schema of `input`.
    Input {
        /// Opaque engine input.
        input: serde_json::Value,
    },
}

impl Action {
    /// Which kind of turn request this action answers.
    pub fn kind(&self) -> RequestKind {
        match self {
            Action::Input { .. } => RequestKind::InputRequired,
            _ => RequestKind::ActionRequired,
        }
    }

    /// Check whether this action is a valid answer to `kind`.
    pub fn satisfies(&self, kind: RequestKind) -> bool {
        self.kind() == kind
    }

    /// The wire tag of this action.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::PlayCard { .. } => "PLAY_CARD",
            Action::Activate { .. } => "ACTIVATE",
            Action::ActivateLeader => "ACTIVATE_LEADER",
            Action::Done => "DONE",
            Action::Input { .. } => "INPUT",
        }
    }
}

/// One player decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// What was decided.
    #[serde(flatten)]
    pub action: Action,
    /// Seat that decided it.
    pub player_id: PlayerId,
    /// Idempotency key minted when the action was applied locally.
    pub action_id: ActionId,
    /// Optional digest of the author's state after applying the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Command {
    /// Create a command for `player_id` with a fresh action id.
    pub fn new(player_id: PlayerId, action: Action) -> Self {
        Self {
            action,
            player_id,
            action_id: ActionId::new(),
            checksum: None,
        }
    }

    /// Attach the author's post-action state checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}

/// A command as held by the log: its assigned position plus append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Log-assigned position in the global order.
    pub sequence_id: SequenceId,
    /// The command itself.
    pub command: Command,
    /// Unix milliseconds when the log accepted the command.
    pub timestamp: u64,
}

impl LogEntry {
    /// Encode the stored record: the command object with `timestamp` added.
    ///
    /// The sequence id is not part of the record; stores key records by it.
    pub fn to_record(&self) -> Result<String, SyncError> {
        let mut value = serde_json::to_value(&self.command).map_err(SyncError::Serialization)?;
        match value.as_object_mut() {
            Some(fields) => {
                fields.insert("timestamp".into(), self.timestamp.into());
            }
            None => return Err(SyncError::InvalidData("command is not an object".into())),
        }
        serde_json::to_string(&value).map_err(SyncError::Serialization)
    }

    /// Decode a stored record under the sequence id it was keyed by.
    pub fn from_record(sequence_id: SequenceId, record: &str) -> Result<Self, SyncError> {
        let mut value: serde_json::Value =
            serde_json::from_str(record).map_err(SyncError::Deserialization)?;
        let timestamp = value
            .as_object_mut()
            .and_then(|fields| fields.remove("timestamp"))
            .and_then(|ts| ts.as_u64())
            .ok_or_else(|| SyncError::InvalidData("record has no timestamp".into()))?;
        let command = serde_json::from_value(value).map_err(SyncError::Deserialization)?;
        Ok(Self {
            sequence_id,
            command,
            timestamp,
        })
    }
}
