//! Session events surfaced to the host application.

use sync_types::{ActionId, DesyncEvent, PlayerId, SequenceId};

/// Something the host should know about. Nothing here is fatal to sync;
/// what to do about it is the host's call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A peer's state checksum differed from ours at the same point.
    DesyncDetected(DesyncEvent),

    /// A local command could not be appended after every retry. It stays at
    /// the head of the upload queue until retried.
    UploadFailed {
        /// The command that failed.
        action_id: ActionId,
        /// Attempts made.
        attempts: u32,
        /// Last error.
        error: String,
    },

    /// Local actions were applied but fell off the engine stream before
    /// they could be queued. They will never be uploaded.
    UploadsLost {
        /// Actions missed.
        missed: u64,
    },

    /// A remote command did not arrive within the configured wait. The
    /// controller keeps waiting; this repeats once per expired wait.
    ConnectionDegraded {
        /// The id that is being waited on.
        sequence_id: SequenceId,
    },

    /// A controller fell behind the engine's turn requests. Its cursor no
    /// longer matches the engine.
    TurnRequestsMissed {
        /// The seat the controller plays.
        seat: PlayerId,
        /// Requests missed.
        missed: u64,
    },
}
