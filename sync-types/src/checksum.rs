//! State checksums for desync detection.
//!
//! Peers attach a checksum of their engine state to the commands they
//! author; the receiving side recomputes it after applying the same
//! sequence id and compares the two strings.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 digest of a serialized engine state.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StateChecksum(String);

impl StateChecksum {
    /// Digest the engine's canonical state bytes.
    pub fn of(state: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"skirmish-state-v1");
        hasher.update(state);
        Self(hex::encode(hasher.finalize()))
    }

    /// The hex string carried on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the hex string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StateChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for StateChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateChecksum({})", &self.0[..12])
    }
}
