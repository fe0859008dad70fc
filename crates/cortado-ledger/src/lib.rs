//! # cortado-ledger
//!
//! The durable write path of the loyalty ledger: converting confirmed
//! purchases into customer-row mutations ([`accrual`]) and consuming
//! pending rewards ([`redemption`]).
//!
//! This crate exclusively owns writes to `stamp_count`, `pending_rewards`
//! and `total_volume`; every mutation runs inside a single IMMEDIATE
//! SQLite transaction so concurrent work on one wallet cannot clobber or
//! double-count.

pub mod accrual;
pub mod redemption;

pub use accrual::{apply_threshold, record_purchase, PurchaseAccrual, RecordPurchase};
pub use redemption::{redeem, RecordRedemption};

/// Error types for ledger mutations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Rejected before any store interaction.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A redemption was attempted with no pending reward.
    #[error("no pending rewards for wallet {0}")]
    InsufficientRewards(String),

    /// The underlying store failed.
    #[error("database error: {0}")]
    Db(#[from] cortado_db::DbError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Db(cortado_db::DbError::Sqlite(e))
    }
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
