//! Post-transaction convergence polling.
//!
//! A freshly mined block is not guaranteed to be visible to the queried
//! node immediately, so the poller retries the counter reads with a
//! linearly growing delay. It never fails: on exhaustion it reports its
//! best-known values with `fresh = false`, and the accrual layer
//! compensates by advancing the off-chain count with the known stamp
//! delta instead of trusting a stale read.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use cortado_chain::ChainLedger;
use cortado_types::WalletAddress;

/// Sleep seam so tests can run the retry schedule without waiting.
#[async_trait]
pub trait Sleep: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleep backed by the Tokio timer.
pub struct TokioSleep;

#[async_trait]
impl Sleep for TokioSleep {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry schedule for convergence polling.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Maximum polling attempts.
    pub max_attempts: u32,
    /// Attempt `n` waits `n * base_delay` before attempt `n + 1`.
    pub base_delay: Duration,
    /// One final wait when the counter never moved past the baseline.
    pub extended_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            extended_delay: Duration::from_millis(2000),
        }
    }
}

/// Counters observed after a mined transaction.
#[derive(Debug, Clone)]
pub struct PolledCounters {
    /// The last stamp count fetched. Only meaningful for comparison when
    /// `fresh` is true.
    pub stamp_count: u64,
    /// Pending reward count, when that read succeeded.
    pub pending_rewards: Option<u64>,
    /// Whether the stamp count moved off the pre-transaction baseline.
    /// A threshold-crossing transaction makes the on-chain count *drop*,
    /// so any departure from the baseline counts as converged.
    pub fresh: bool,
    /// Attempts spent in the main loop.
    pub attempts: u32,
}

/// Poll the on-chain counters after a mined transaction.
///
/// Up to `policy.max_attempts` reads, tracking the highest value observed.
/// A read that raises the running maximum ends the loop early (two
/// observations, the later one larger — treated as converged). Read
/// failures count as attempts and are logged, never raised. If the count
/// is still the pre-transaction value after all attempts, one extended
/// delay and a final read give the node a last chance to catch up; after
/// that the caller falls back to its known stamp delta. The caller may
/// cancel between attempts by dropping the future; nothing here holds
/// state that would need rollback.
pub async fn poll_after_tx(
    chain: &dyn ChainLedger,
    sleep: &dyn Sleep,
    policy: &PollPolicy,
    wallet: &WalletAddress,
    baseline_stamp_count: u64,
) -> PolledCounters {
    let mut best: u64 = 0;
    let mut last: u64 = 0;
    let mut seen_any = false;
    let mut attempts = 0;

    for attempt in 1..=policy.max_attempts {
        attempts = attempt;
        match chain.stamp_count(wallet).await {
            Ok(count) => {
                debug!(%wallet, attempt, count, best, "convergence poll");
                // An increase needs two observations, so this never fires
                // on the first successful read.
                let increased = seen_any && count > best;
                best = best.max(count);
                last = count;
                seen_any = true;
                if increased {
                    break;
                }
            }
            Err(e) => {
                warn!(%wallet, attempt, error = %e, "counter read failed during convergence poll");
            }
        }

        if attempt < policy.max_attempts {
            sleep.sleep(policy.base_delay * attempt).await;
        }
    }

    let mut fresh = seen_any && last != baseline_stamp_count;

    if !fresh {
        // Still at the pre-transaction value: one extended wait before
        // giving up and falling back to the caller's stamp delta.
        sleep.sleep(policy.extended_delay).await;
        match chain.stamp_count(wallet).await {
            Ok(count) => {
                debug!(%wallet, count, best, "extended convergence poll");
                last = count;
                fresh = count != baseline_stamp_count;
            }
            Err(e) => {
                warn!(%wallet, error = %e, "extended counter read failed");
            }
        }
    }

    let pending_rewards = match chain.pending_rewards(wallet).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%wallet, error = %e, "pending reward read failed after poll");
            None
        }
    };

    PolledCounters {
        stamp_count: last,
        pending_rewards,
        fresh,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortado_chain::StubChain;
    use std::sync::Mutex;

    /// Records requested delays instead of waiting.
    struct RecordingSleep {
        delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleep {
        fn new() -> Self {
            Self {
                delays: Mutex::new(Vec::new()),
            }
        }

        fn delays(&self) -> Vec<Duration> {
            self.delays.lock().expect("delay log lock").clone()
        }
    }

    #[async_trait]
    impl Sleep for RecordingSleep {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().expect("delay log lock").push(duration);
        }
    }

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{:040x}", n)).expect("test wallet")
    }

    fn policy() -> PollPolicy {
        PollPolicy::default()
    }

    #[tokio::test]
    async fn test_converges_when_lag_clears() {
        let chain = StubChain::with_read_lag(8, 1);
        let sleep = RecordingSleep::new();
        let w = wallet(1);

        chain.submit_stamp(&w).await.expect("submit");

        // Attempt 1 sees the stale 0, attempt 2 sees the fresh 1 and stops.
        let polled = poll_after_tx(&chain, &sleep, &policy(), &w, 0).await;
        assert!(polled.fresh);
        assert_eq!(polled.stamp_count, 1);
        assert_eq!(polled.attempts, 2);
        assert_eq!(sleep.delays(), vec![Duration::from_millis(1000)]);
    }

    #[tokio::test]
    async fn test_linear_backoff_schedule() {
        let chain = StubChain::with_read_lag(8, 100);
        let sleep = RecordingSleep::new();
        let w = wallet(1);

        chain.submit_stamp(&w).await.expect("submit");

        let polled = poll_after_tx(&chain, &sleep, &policy(), &w, 0).await;
        assert!(!polled.fresh, "lag far exceeds the retry budget");
        assert_eq!(polled.attempts, 5);

        // Four inter-attempt delays growing linearly, then the extended wait.
        assert_eq!(
            sleep.delays(),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(3000),
                Duration::from_millis(4000),
                Duration::from_millis(2000),
            ]
        );
    }

    #[tokio::test]
    async fn test_extended_retry_rescues_late_propagation() {
        // Lag of 6: the baseline-visible value survives all five attempts
        // and the sixth read (the extended retry) finally sees fresh state.
        let chain = StubChain::with_read_lag(8, 5);
        let sleep = RecordingSleep::new();
        let w = wallet(1);

        chain.submit_stamp(&w).await.expect("submit");

        let polled = poll_after_tx(&chain, &sleep, &policy(), &w, 0).await;
        assert!(polled.fresh, "extended retry should observe the increment");
        assert_eq!(polled.stamp_count, 1);
        assert_eq!(sleep.delays().len(), 5);
    }

    #[tokio::test]
    async fn test_read_failures_do_not_abort() {
        let chain = StubChain::new(8);
        let sleep = RecordingSleep::new();
        let w = wallet(1);

        chain.submit_stamp(&w).await.expect("submit");
        chain.fail_next_reads(2).await;

        let polled = poll_after_tx(&chain, &sleep, &policy(), &w, 0).await;
        assert!(polled.fresh, "later attempts succeed after injected failures");
        assert_eq!(polled.stamp_count, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_best_known() {
        let chain = StubChain::new(8);
        let sleep = RecordingSleep::new();
        let w = wallet(1);

        // Every read fails: the poller still returns instead of raising.
        chain.submit_stamp(&w).await.expect("submit");
        chain.fail_next_reads(100).await;

        let polled = poll_after_tx(&chain, &sleep, &policy(), &w, 0).await;
        assert!(!polled.fresh);
        assert_eq!(polled.pending_rewards, None);
    }

    #[tokio::test]
    async fn test_pending_rewards_fetched_after_convergence() {
        let chain = StubChain::new(3);
        let sleep = RecordingSleep::new();
        let w = wallet(1);

        for _ in 0..3 {
            chain.submit_stamp(&w).await.expect("submit");
        }

        let polled = poll_after_tx(&chain, &sleep, &policy(), &w, 2).await;
        assert_eq!(polled.pending_rewards, Some(1));
    }
}
