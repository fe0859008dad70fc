//! Wallet and transaction identifiers.
//!
//! Both identifiers are carried as lowercase `0x`-prefixed hex strings. The
//! lowercase form is canonical: the customers table is keyed by it, and the
//! idempotency check on purchases compares it byte-for-byte. Normalization
//! happens exactly once, at parse time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors from parsing wallet addresses and transaction hashes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The input was empty or whitespace.
    #[error("identifier is empty")]
    Empty,

    /// The input did not start with `0x`.
    #[error("identifier must start with 0x: {0}")]
    MissingPrefix(String),

    /// The hex payload had the wrong length or non-hex characters.
    #[error("malformed {kind}: expected 0x followed by {expected} hex characters")]
    Malformed {
        /// Which identifier kind failed ("wallet address" or "transaction hash").
        kind: &'static str,
        /// Expected hex character count.
        expected: usize,
    },
}

/// Validate and lowercase a `0x`-prefixed hex identifier of fixed length.
fn normalize_hex(input: &str, kind: &'static str, expected: usize) -> Result<String, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    let lower = trimmed.to_ascii_lowercase();
    let payload = lower
        .strip_prefix("0x")
        .ok_or_else(|| ParseError::MissingPrefix(trimmed.to_string()))?;
    if payload.len() != expected || !payload.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::Malformed { kind, expected });
    }
    Ok(lower)
}

/// A lowercase-normalized wallet address (`0x` + 40 hex characters).
///
/// The immutable identity key of a customer ledger row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse and normalize a wallet address.
    ///
    /// # Errors
    ///
    /// - [`ParseError::Empty`] if the input is empty
    /// - [`ParseError::MissingPrefix`] without a `0x` prefix
    /// - [`ParseError::Malformed`] if not exactly 40 hex characters
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        normalize_hex(input, "wallet address", 40).map(Self)
    }

    /// The canonical lowercase string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WalletAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A lowercase-normalized transaction hash (`0x` + 64 hex characters).
///
/// The idempotency key for purchase and redemption records.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    /// Parse and normalize a transaction hash.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`WalletAddress::parse`], expecting 64 hex characters.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        normalize_hex(input, "transaction hash", 64).map(Self)
    }

    /// The canonical lowercase string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TxHash {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
