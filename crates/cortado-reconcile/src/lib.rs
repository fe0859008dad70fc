//! # cortado-reconcile
//!
//! The reconciliation engine between the on-chain loyalty ledger and the
//! off-chain customer mirror:
//!
//! - [`poller`] — after a transaction is mined, obtain the freshest
//!   on-chain counters, tolerating propagation lag across nodes
//! - [`guard`] — compare on-chain and off-chain counters after every
//!   write and surface drift instead of silently trusting either side
//! - [`flow`] — the caller-facing purchase/stamp/redeem orchestrations
//!   with their reconciliation status tags

pub mod flow;
pub mod guard;
pub mod poller;

pub use flow::{
    LoyaltyEngine, PurchaseOutcome, PurchaseRequest, RedeemOutcome, RedeemRequest, StampRequest,
};
pub use guard::DriftWarning;
pub use poller::{PollPolicy, PolledCounters, Sleep, TokioSleep};

use cortado_chain::ChainError;
use cortado_ledger::LedgerError;

/// Error types for flow orchestration.
///
/// Only failures *before or at* the on-chain settlement appear here. An
/// off-chain write failure after a mined transaction is reported on the
/// flow outcome as `sync_pending`, never raised.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Rejected before any chain or store interaction.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The chain interaction failed; nothing was recorded off-chain.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// A ledger precondition failed (e.g. no pending rewards).
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Convenience result type for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;
