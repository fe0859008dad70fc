//! In-memory chain for tests and dev mode.
//!
//! The stub mirrors the black-box contract behavior: every purchase or
//! stamp submission awards one stamp, stamps convert to rewards at the
//! configured threshold, and redeeming with nothing pending reverts.
//!
//! Eventual consistency across RPC nodes is modeled as a configurable read
//! lag: after a mutation, the next `read_lag` counter reads return the
//! pre-mutation values. Fault injection covers gateway failures, reverts,
//! and user rejections.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::debug;

use cortado_types::{TxHash, WalletAddress};

use crate::{ChainError, ChainLedger, Result, TxReceipt};

#[derive(Default)]
struct StubAccount {
    stamps: u64,
    rewards: u64,
    visible_stamps: u64,
    visible_rewards: u64,
    /// Counter reads left before fresh values become visible.
    lag_remaining: u32,
}

struct StubState {
    reward_threshold: u64,
    accounts: HashMap<String, StubAccount>,
    next_block: u64,
    read_lag: u32,
    reads_to_fail: u32,
    submits_to_fail: u32,
    revert_next_submit: bool,
    reject_next_submit: bool,
}

/// A deterministic [`ChainLedger`] backed by process memory.
pub struct StubChain {
    state: Mutex<StubState>,
}

impl StubChain {
    /// Create a stub chain converting stamps to rewards at `reward_threshold`.
    pub fn new(reward_threshold: u32) -> Self {
        Self::with_read_lag(reward_threshold, 0)
    }

    /// Create a stub chain whose counter reads lag mutations by `read_lag` reads.
    pub fn with_read_lag(reward_threshold: u32, read_lag: u32) -> Self {
        Self {
            state: Mutex::new(StubState {
                reward_threshold: u64::from(reward_threshold),
                accounts: HashMap::new(),
                next_block: 0,
                read_lag,
                reads_to_fail: 0,
                submits_to_fail: 0,
                revert_next_submit: false,
                reject_next_submit: false,
            }),
        }
    }

    /// Change the read lag for subsequent mutations.
    pub async fn set_read_lag(&self, read_lag: u32) {
        self.state.lock().await.read_lag = read_lag;
    }

    /// Make the next `n` counter reads fail with a gateway error.
    pub async fn fail_next_reads(&self, n: u32) {
        self.state.lock().await.reads_to_fail = n;
    }

    /// Make the next `n` submissions fail with a gateway error.
    pub async fn fail_next_submits(&self, n: u32) {
        self.state.lock().await.submits_to_fail = n;
    }

    /// Make the next submission mine but revert.
    pub async fn revert_next_submit(&self) {
        self.state.lock().await.revert_next_submit = true;
    }

    /// Make the next submission fail as a user signing rejection.
    pub async fn reject_next_submit(&self) {
        self.state.lock().await.reject_next_submit = true;
    }

    /// Credit rewards directly, bypassing stamp accrual. Visible immediately.
    pub async fn credit_rewards(&self, wallet: &WalletAddress, rewards: u64) {
        let mut state = self.state.lock().await;
        let account = state.accounts.entry(wallet.as_str().to_string()).or_default();
        account.rewards += rewards;
        account.visible_rewards = account.rewards;
    }

    /// The true (fully propagated) `(stamps, rewards)` counters for a wallet.
    pub async fn settled_counters(&self, wallet: &WalletAddress) -> (u64, u64) {
        let state = self.state.lock().await;
        state
            .accounts
            .get(wallet.as_str())
            .map(|a| (a.stamps, a.rewards))
            .unwrap_or((0, 0))
    }
}

impl StubState {
    fn check_submit_faults(&mut self) -> Result<()> {
        if self.submits_to_fail > 0 {
            self.submits_to_fail -= 1;
            return Err(ChainError::Gateway("injected submit failure".to_string()));
        }
        if self.reject_next_submit {
            self.reject_next_submit = false;
            return Err(ChainError::UserRejected);
        }
        Ok(())
    }

    fn mine(&mut self) -> Result<TxReceipt> {
        self.next_block += 1;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let tx_hash = TxHash::parse(&format!("0x{}", hex::encode(bytes)))
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        Ok(TxReceipt {
            tx_hash,
            block_number: self.next_block,
        })
    }

    /// Snapshot the visible counters and restart the lag window for a mutation.
    fn begin_mutation(read_lag: u32, account: &mut StubAccount) {
        if read_lag > 0 && account.lag_remaining == 0 {
            account.visible_stamps = account.stamps;
            account.visible_rewards = account.rewards;
        }
        account.lag_remaining = read_lag;
    }

    fn award_stamp(&mut self, wallet: &WalletAddress) {
        let threshold = self.reward_threshold;
        let read_lag = self.read_lag;
        let account = self.accounts.entry(wallet.as_str().to_string()).or_default();
        Self::begin_mutation(read_lag, account);
        account.stamps += 1;
        if account.stamps >= threshold {
            account.stamps -= threshold;
            account.rewards += 1;
        }
    }

    fn check_read_faults(&mut self) -> Result<()> {
        if self.reads_to_fail > 0 {
            self.reads_to_fail -= 1;
            return Err(ChainError::Gateway("injected read failure".to_string()));
        }
        Ok(())
    }

    /// Read a counter, consuming one lag tick per read while the window lasts.
    fn read_counter(&mut self, wallet: &WalletAddress, rewards: bool) -> u64 {
        match self.accounts.get_mut(wallet.as_str()) {
            None => 0,
            Some(account) => {
                if account.lag_remaining > 0 {
                    account.lag_remaining -= 1;
                    if rewards {
                        account.visible_rewards
                    } else {
                        account.visible_stamps
                    }
                } else {
                    account.visible_stamps = account.stamps;
                    account.visible_rewards = account.rewards;
                    if rewards {
                        account.rewards
                    } else {
                        account.stamps
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ChainLedger for StubChain {
    async fn submit_purchase(&self, wallet: &WalletAddress, amount: u64) -> Result<TxReceipt> {
        let mut state = self.state.lock().await;
        state.check_submit_faults()?;
        let receipt = state.mine()?;
        if state.revert_next_submit {
            state.revert_next_submit = false;
            return Err(ChainError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }
        state.award_stamp(wallet);
        debug!(%wallet, amount, block = receipt.block_number, "stub purchase mined");
        Ok(receipt)
    }

    async fn submit_stamp(&self, wallet: &WalletAddress) -> Result<TxReceipt> {
        let mut state = self.state.lock().await;
        state.check_submit_faults()?;
        let receipt = state.mine()?;
        if state.revert_next_submit {
            state.revert_next_submit = false;
            return Err(ChainError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }
        state.award_stamp(wallet);
        Ok(receipt)
    }

    async fn submit_redeem(&self, wallet: &WalletAddress) -> Result<TxReceipt> {
        let mut state = self.state.lock().await;
        state.check_submit_faults()?;
        let receipt = state.mine()?;
        if state.revert_next_submit {
            state.revert_next_submit = false;
            return Err(ChainError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }

        let read_lag = state.read_lag;
        let account = state.accounts.entry(wallet.as_str().to_string()).or_default();
        if account.rewards == 0 {
            // The contract rejects a redeem with nothing pending.
            return Err(ChainError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }
        StubState::begin_mutation(read_lag, account);
        account.rewards -= 1;
        Ok(receipt)
    }

    async fn stamp_count(&self, wallet: &WalletAddress) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check_read_faults()?;
        Ok(state.read_counter(wallet, false))
    }

    async fn pending_rewards(&self, wallet: &WalletAddress) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check_read_faults()?;
        Ok(state.read_counter(wallet, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{:040x}", n)).expect("test wallet")
    }

    #[tokio::test]
    async fn test_purchase_awards_stamp() {
        let chain = StubChain::new(8);
        let w = wallet(1);

        let receipt = chain.submit_purchase(&w, 2_000_000).await.expect("submit");
        assert_eq!(receipt.block_number, 1);
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 1);
        assert_eq!(chain.pending_rewards(&w).await.expect("read"), 0);
    }

    #[tokio::test]
    async fn test_threshold_converts_to_reward() {
        let chain = StubChain::new(3);
        let w = wallet(1);

        for _ in 0..3 {
            chain.submit_stamp(&w).await.expect("submit");
        }
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 0);
        assert_eq!(chain.pending_rewards(&w).await.expect("read"), 1);
    }

    #[tokio::test]
    async fn test_read_lag_hides_fresh_state() {
        let chain = StubChain::with_read_lag(8, 2);
        let w = wallet(1);

        chain.submit_stamp(&w).await.expect("submit");
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 0, "first read lags");
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 0, "second read lags");
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 1, "third read is fresh");
    }

    #[tokio::test]
    async fn test_lag_window_restarts_per_mutation() {
        let chain = StubChain::with_read_lag(8, 1);
        let w = wallet(1);

        chain.submit_stamp(&w).await.expect("submit");
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 0);
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 1);

        chain.submit_stamp(&w).await.expect("submit");
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 1, "lags at pre-mutation value");
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 2);
    }

    #[tokio::test]
    async fn test_redeem_without_reward_reverts() {
        let chain = StubChain::new(8);
        let w = wallet(1);

        let result = chain.submit_redeem(&w).await;
        assert!(matches!(result, Err(ChainError::Reverted { .. })));
    }

    #[tokio::test]
    async fn test_redeem_consumes_reward() {
        let chain = StubChain::new(8);
        let w = wallet(1);
        chain.credit_rewards(&w, 2).await;

        chain.submit_redeem(&w).await.expect("redeem");
        assert_eq!(chain.pending_rewards(&w).await.expect("read"), 1);
    }

    #[tokio::test]
    async fn test_submit_fault_injection() {
        let chain = StubChain::new(8);
        let w = wallet(1);

        chain.fail_next_submits(1).await;
        assert!(matches!(
            chain.submit_stamp(&w).await,
            Err(ChainError::Gateway(_))
        ));
        chain.submit_stamp(&w).await.expect("second submit succeeds");

        chain.reject_next_submit().await;
        let rejected = chain.submit_stamp(&w).await.expect_err("rejected");
        assert!(rejected.is_user_rejection());

        chain.revert_next_submit().await;
        assert!(matches!(
            chain.submit_stamp(&w).await,
            Err(ChainError::Reverted { .. })
        ));

        // Faults do not leak into later submissions.
        chain.submit_stamp(&w).await.expect("clean submit");
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 2);
    }

    #[tokio::test]
    async fn test_read_fault_injection() {
        let chain = StubChain::new(8);
        let w = wallet(1);
        chain.submit_stamp(&w).await.expect("submit");

        chain.fail_next_reads(1).await;
        assert!(matches!(
            chain.stamp_count(&w).await,
            Err(ChainError::Gateway(_))
        ));
        assert_eq!(chain.stamp_count(&w).await.expect("read"), 1);
    }

    #[tokio::test]
    async fn test_unknown_wallet_reads_zero() {
        let chain = StubChain::new(8);
        assert_eq!(chain.stamp_count(&wallet(9)).await.expect("read"), 0);
        assert_eq!(chain.pending_rewards(&wallet(9)).await.expect("read"), 0);
    }

    #[tokio::test]
    async fn test_reverted_submit_awards_nothing() {
        let chain = StubChain::new(8);
        let w = wallet(1);

        chain.revert_next_submit().await;
        let _ = chain.submit_purchase(&w, 1_000_000).await;
        assert_eq!(chain.settled_counters(&w).await, (0, 0));
    }
}
