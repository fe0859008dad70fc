//! # cortado-types
//!
//! Shared domain types used across the cortado workspace: wallet and
//! transaction identifiers, product metadata, reconciliation status tags,
//! and the monetary unit constants.

pub mod event;
pub mod product;
pub mod status;
pub mod wallet;

pub use product::Product;
pub use status::ReconcileStatus;
pub use wallet::{TxHash, WalletAddress};

/// Micro-tokens per token (1 token = 1,000,000 micro-tokens).
///
/// All ledger arithmetic runs in micro-tokens; display-level formatting is
/// the UI's concern.
pub const MICRO_TOKENS_PER_TOKEN: u64 = 1_000_000;

/// Default number of stamps required for one free-drink reward.
pub const DEFAULT_REWARD_THRESHOLD: u32 = 8;

/// Default number of stamps awarded per purchase.
pub const DEFAULT_STAMPS_PER_PURCHASE: u32 = 1;
