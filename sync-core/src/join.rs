//! Join codes for pairing a second player into a session.
//!
//! A join code is 6 characters from an alphabet without the easily
//! confused `0`/`O` and `1`/`I`. The host reads it out or shares it; the
//! guest types it in, case-insensitively. Dashes and spaces are ignored on
//! input so `ABC-DEF` and `abc def` both work.
//!
//! Uniqueness is the log's job: it retries generation on collision.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Characters a join code may contain.
pub const JOIN_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in a join code.
pub const JOIN_CODE_LEN: usize = 6;

/// Error type for join code parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinCodeError {
    /// Wrong number of characters after cleanup.
    #[error("join code must be 6 characters, got {0}")]
    InvalidLength(usize),
    /// A character outside the alphabet.
    #[error("invalid character in join code: {0:?}")]
    InvalidCharacter(char),
    /// The system random source failed.
    #[error("random source unavailable: {0}")]
    Entropy(String),
}

/// A validated, upper-case join code.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinCode(String);

impl JoinCode {
    /// Generate a random code.
    pub fn generate() -> Result<Self, JoinCodeError> {
        let mut bytes = [0u8; JOIN_CODE_LEN];
        getrandom::getrandom(&mut bytes).map_err(|e| JoinCodeError::Entropy(e.to_string()))?;
        Ok(Self::from_random_bytes(bytes))
    }

    /// Build a code from raw random bytes.
    ///
    /// The alphabet has 32 symbols, so masking to 5 bits is unbiased.
    pub fn from_random_bytes(bytes: [u8; JOIN_CODE_LEN]) -> Self {
        let code = bytes
            .iter()
            .map(|b| JOIN_CODE_ALPHABET[(b & 0x1F) as usize] as char)
            .collect();
        Self(code)
    }

    /// Parse user input: upper-cases and drops dashes and whitespace.
    pub fn parse(input: &str) -> Result<Self, JoinCodeError> {
        let clean: String = input
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let len = clean.chars().count();
        if len != JOIN_CODE_LEN {
            return Err(JoinCodeError::InvalidLength(len));
        }

        if let Some(bad) = clean.chars().find(|c| !is_code_char(*c)) {
            return Err(JoinCodeError::InvalidCharacter(bad));
        }

        Ok(Self(clean))
    }

    /// The code as shown to players.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_code_char(c: char) -> bool {
    c.is_ascii() && JOIN_CODE_ALPHABET.contains(&(c as u8))
}

impl FromStr for JoinCode {
    type Err = JoinCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JoinCode({})", self.0)
    }
}
