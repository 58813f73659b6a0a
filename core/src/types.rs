//! Shared primitive types used across the ledger.

use crate::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row id of a purchased position.
pub type PositionId = i64;

/// Identifier of one job execution (uuid v4).
pub type RunId = String;

/// A wallet address in canonical (lower-cased) form.
///
/// Wallet identity is case-insensitive everywhere in the ledger, so every
/// address entering the store goes through this type first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse and validate an EVM-style address (`0x` + 40 hex digits).
    pub fn parse(raw: &str) -> LedgerResult<Self> {
        let candidate = normalize(raw);
        if is_valid_address(&candidate) {
            Ok(Self(candidate))
        } else {
            Err(LedgerError::InvalidAddress {
                address: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lower-case and trim without validating. Used for keys of data that is
/// already in the store (cycle guards, map lookups).
pub fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn is_valid_address(candidate: &str) -> bool {
    candidate.len() == 42
        && candidate.starts_with("0x")
        && candidate[2..].bytes().all(|b| b.is_ascii_hexdigit())
}
