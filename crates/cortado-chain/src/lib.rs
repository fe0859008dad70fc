//! # cortado-chain
//!
//! Client for the on-chain loyalty ledger. The contracts themselves are a
//! black box behind the deployment's chain gateway service; this crate
//! defines the client seam ([`ChainLedger`]), the production HTTP
//! implementation ([`HttpChainLedger`]), and a deterministic in-memory
//! stand-in ([`StubChain`]) for tests and dev mode.
//!
//! Submit calls block until the transaction is mined. A mined transaction
//! whose receipt reports failure surfaces as [`ChainError::Reverted`] — it
//! is never treated as success.

pub mod http;
pub mod stub;

use async_trait::async_trait;

use cortado_types::{TxHash, WalletAddress};

pub use http::HttpChainLedger;
pub use stub::StubChain;

/// Error types for chain interactions.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Gateway or node unreachable, or a transport-level failure.
    #[error("chain gateway error: {0}")]
    Gateway(String),

    /// The transaction was mined but its receipt reported revert status.
    #[error("transaction reverted: {tx_hash}")]
    Reverted {
        /// Hash of the reverted transaction.
        tx_hash: TxHash,
    },

    /// The wallet holder declined to sign the transaction.
    #[error("transaction rejected by user")]
    UserRejected,

    /// No receipt was produced within the submission deadline.
    #[error("timed out waiting for transaction receipt")]
    Timeout,

    /// The gateway response did not match the expected shape.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Whether this failure came from the user declining to sign.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ChainError::UserRejected)
    }
}

/// Convenience result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// The on-chain loyalty ledger, as seen by the reconciliation engine.
///
/// All submit methods block until the transaction is mined or fail with a
/// [`ChainError`]; the counter reads return whatever the queried node
/// currently sees, which may lag a freshly mined block.
#[async_trait]
pub trait ChainLedger: Send + Sync {
    /// Submit a coffee purchase of `amount` micro-tokens and wait for mining.
    async fn submit_purchase(&self, wallet: &WalletAddress, amount: u64) -> Result<TxReceipt>;

    /// Submit a standalone loyalty stamp and wait for mining.
    async fn submit_stamp(&self, wallet: &WalletAddress) -> Result<TxReceipt>;

    /// Submit a reward redemption and wait for mining.
    async fn submit_redeem(&self, wallet: &WalletAddress) -> Result<TxReceipt>;

    /// Current stamp count for a wallet, as seen by the queried node.
    async fn stamp_count(&self, wallet: &WalletAddress) -> Result<u64>;

    /// Current unredeemed reward count for a wallet.
    async fn pending_rewards(&self, wallet: &WalletAddress) -> Result<u64>;
}
