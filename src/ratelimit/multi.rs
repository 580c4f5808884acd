//! Multi-tier limiter: several quotas enforced together.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::admission::{admit, Gate};
use super::behavior::{Behavior, BehaviorOverride, WaitPolicy};
use super::bucket::TokenBucket;
use super::tier::{LimiterStatus, Tier};
use crate::error::{LimiterError, Result};

/// Enforces every tier at once, e.g. "10 per second AND 100 per minute".
///
/// A request is admitted only if every tier has enough tokens, and then all
/// tiers are debited together while the limiter's own lock is held. Blocked
/// callers wait for the slowest tier to catch up.
#[derive(Debug)]
pub struct MultiRateLimiter {
    /// One accounting bucket per tier, in construction order
    buckets: Vec<TokenBucket>,
    behavior: Behavior,
    wait_policy: WaitPolicy,
    /// Serializes cross-tier check-and-debit
    lock: Mutex<()>,
    reset_notify: Notify,
}

impl MultiRateLimiter {
    /// Create a limiter enforcing all `tiers`.
    ///
    /// Fails with [`LimiterError::InvalidConfiguration`] if `tiers` is empty.
    pub fn new(tiers: Vec<Tier>, behavior: Behavior) -> Result<Self> {
        if tiers.is_empty() {
            return Err(LimiterError::InvalidConfiguration(
                "at least one tier is required".to_string(),
            ));
        }

        // Inner buckets only do accounting; this limiter decides whether to
        // wait, raise or skip.
        let buckets = tiers
            .into_iter()
            .map(|tier| TokenBucket::from_tier(tier, Behavior::Skip))
            .collect();

        Ok(Self {
            buckets,
            behavior,
            wait_policy: WaitPolicy::default(),
            lock: Mutex::new(()),
            reset_notify: Notify::new(),
        })
    }

    /// Build from raw `(limit, period)` pairs, validating each one.
    pub fn from_limits<I>(limits: I, behavior: Behavior) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, Duration)>,
    {
        let tiers = limits
            .into_iter()
            .map(|(limit, period)| Tier::new(limit, period))
            .collect::<Result<Vec<_>>>()?;
        Self::new(tiers, behavior)
    }

    /// Set how blocked acquisitions behave after their first wait.
    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.buckets.iter().map(TokenBucket::tier).collect()
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait_policy
    }

    /// Acquire `tokens` from every tier.
    ///
    /// Same contract as [`TokenBucket::acquire`]; a blocked caller waits for
    /// the longest shortfall among the tiers.
    pub async fn acquire(&self, tokens: u32, behavior: impl Into<BehaviorOverride>) -> Result<bool> {
        self.acquire_with_cancel(tokens, behavior, std::future::pending())
            .await
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`LimiterError::Cancelled`] as soon as `cancel` completes.
    pub async fn acquire_with_cancel<C>(
        &self,
        tokens: u32,
        behavior: impl Into<BehaviorOverride>,
        cancel: C,
    ) -> Result<bool>
    where
        C: Future<Output = ()>,
    {
        let behavior = behavior.into().resolve(self.behavior);
        let gate = Gate {
            capacity: self.capacity(),
            policy: self.wait_policy,
            notify: &self.reset_notify,
        };
        admit(gate, tokens, behavior, || self.try_debit_all(tokens), cancel).await
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`LimiterError::Timeout`] once `timeout` has passed.
    pub async fn acquire_timeout(
        &self,
        tokens: u32,
        behavior: impl Into<BehaviorOverride>,
        timeout: Duration,
    ) -> Result<bool> {
        match tokio::time::timeout(timeout, self.acquire(tokens, behavior)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(tokens, timeout = ?timeout, "Timed out waiting for tokens on all tiers");
                Err(LimiterError::Timeout(timeout))
            }
        }
    }

    /// Take `tokens` from every tier if all of them have enough right now.
    pub fn try_acquire(&self, tokens: u32) -> bool {
        tokens == 0 || self.try_debit_all(tokens).is_ok()
    }

    /// Wait for and consume a single token using the default behavior.
    pub async fn wait<C>(&self, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        self.acquire_with_cancel(1, BehaviorOverride::UseDefault, cancel)
            .await
            .map(|_| ())
    }

    /// One snapshot per tier, in construction order.
    pub fn status(&self) -> Vec<LimiterStatus> {
        let _guard = self.lock.lock();
        self.buckets.iter().map(TokenBucket::status).collect()
    }

    /// Time until every tier has at least one token.
    pub fn time_until_ready(&self) -> Duration {
        let _guard = self.lock.lock();
        self.buckets
            .iter()
            .map(TokenBucket::time_until_next_token)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Refill every tier to its own capacity and wake blocked callers.
    pub fn reset(&self) {
        {
            let _guard = self.lock.lock();
            for bucket in &self.buckets {
                bucket.reset();
            }
        }
        self.reset_notify.notify_waiters();
    }

    /// Largest request any single call can ever be granted.
    fn capacity(&self) -> u32 {
        self.buckets
            .iter()
            .map(TokenBucket::limit)
            .min()
            .unwrap_or(0)
    }

    /// Check all tiers and debit all of them, or none, under the outer lock.
    fn try_debit_all(&self, tokens: u32) -> std::result::Result<(), Duration> {
        let _guard = self.lock.lock();

        let longest_wait = self
            .buckets
            .iter()
            .filter_map(|bucket| bucket.shortfall(tokens))
            .max();
        if let Some(wait) = longest_wait {
            return Err(wait);
        }

        for bucket in &self.buckets {
            // Only this lock holder touches the inner buckets and refill
            // never removes tokens, so every tier still has enough.
            let debited = bucket.try_debit(tokens).is_ok();
            debug_assert!(debited, "tier ran short between check and debit");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use tokio::time::Instant;
    use tokio_test::{assert_pending, assert_ready};

    fn tiers(limits: &[(u32, u64)]) -> Vec<Tier> {
        limits.iter()
            .map(|&(limit, secs)| Tier::new(limit, Duration::from_secs(secs)).unwrap())
            .collect()
    }

    #[test]
    fn test_rejects_empty_or_invalid_tiers() {
        assert!(matches!(
            MultiRateLimiter::new(Vec::new(), Behavior::Skip),
            Err(LimiterError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            MultiRateLimiter::from_limits(
                [(3, Duration::from_secs(1)), (0, Duration::from_secs(60))],
                Behavior::Skip
            ),
            Err(LimiterError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_and_gating_across_tiers() {
        let limiter = MultiRateLimiter::new(tiers(&[(3, 1), (5, 2)]), Behavior::Skip).unwrap();

        for i in 0..3 {
            assert!(limiter.try_acquire(1), "request {} should be admitted", i);
        }
        // The 2s tier still has about 2 tokens, but the 1s tier is empty.
        assert!(!limiter.try_acquire(1));

        let status = limiter.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].limit, 3);
        assert_eq!(status[1].limit, 5);
        assert_eq!(status[1].period, Duration::from_secs(2));
        assert!(status[1].available_tokens >= 1.5 && status[1].available_tokens <= 2.5);
    }

    #[test]
    fn test_rejected_request_debits_no_tier() {
        let limiter = MultiRateLimiter::new(tiers(&[(10, 3600), (2, 3600)]), Behavior::Skip).unwrap();

        assert!(limiter.try_acquire(2));
        assert!(!limiter.try_acquire(1));

        let status = limiter.status();
        assert!(status[0].available_tokens >= 8.0 && status[0].available_tokens < 8.01);
        assert!(status[1].available_tokens < 0.01);
    }

    #[test]
    fn test_concurrent_callers_admit_exactly_tightest_tier() {
        let limiter = MultiRateLimiter::new(tiers(&[(40, 3600), (25, 3600)]), Behavior::Skip).unwrap();
        let admitted = AtomicUsize::new(0);
        let barrier = Barrier::new(100);

        std::thread::scope(|s| {
            for _ in 0..100 {
                s.spawn(|| {
                    barrier.wait();
                    if limiter.try_acquire(1) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 25);
        let status = limiter.status();
        assert!(status[0].available_tokens >= 15.0 && status[0].available_tokens < 15.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_waits_for_slowest_tier() {
        let limiter = MultiRateLimiter::new(tiers(&[(2, 1), (3, 6)]), Behavior::Block).unwrap();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.wait(std::future::pending()).await.unwrap();
        }
        // Third call: 1s tier is short 1 token (0.5s), 6s tier still has one.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "waited {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(510), "waited {:?}", elapsed);

        // Fourth call: the 6s tier is 0.75 tokens short, another 1.5s.
        assert!(limiter.acquire(1, BehaviorOverride::UseDefault).await.unwrap());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000), "waited {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2010), "waited {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_ready_is_max_of_tiers() {
        let limiter = MultiRateLimiter::new(tiers(&[(2, 1), (2, 10)]), Behavior::Skip).unwrap();
        assert_eq!(limiter.time_until_ready(), Duration::ZERO);

        assert!(limiter.try_acquire(2));
        assert_eq!(limiter.time_until_ready(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_raise_and_skip() {
        let limiter = MultiRateLimiter::new(tiers(&[(1, 3600), (10, 3600)]), Behavior::Raise).unwrap();

        assert!(limiter.acquire(1, BehaviorOverride::UseDefault).await.unwrap());
        assert!(matches!(
            limiter.acquire(1, BehaviorOverride::UseDefault).await,
            Err(LimiterError::RateLimitExceeded { .. })
        ));
        assert!(!limiter.acquire(1, Behavior::Skip).await.unwrap());
    }

    #[tokio::test]
    async fn test_request_beyond_tightest_capacity() {
        let limiter = MultiRateLimiter::new(tiers(&[(5, 1), (2, 60)]), Behavior::Block).unwrap();

        assert!(matches!(
            limiter.acquire(3, BehaviorOverride::UseDefault).await,
            Err(LimiterError::ExceedsCapacity {
                requested: 3,
                capacity: 2
            })
        ));
        assert!(matches!(
            limiter.acquire(3, Behavior::Raise).await,
            Err(LimiterError::RateLimitExceeded { retry_after }) if retry_after == Duration::MAX
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_leaves_all_tiers_untouched() {
        let limiter = MultiRateLimiter::new(tiers(&[(1, 1), (5, 60)]), Behavior::Block).unwrap();
        assert!(limiter.try_acquire(1));

        let result = limiter
            .acquire_with_cancel(
                1,
                BehaviorOverride::UseDefault,
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await;
        assert!(matches!(result, Err(LimiterError::Cancelled)));

        let status = limiter.status();
        assert!(status[1].available_tokens >= 4.0 && status[1].available_tokens < 4.01);

        let result = limiter
            .acquire_timeout(1, BehaviorOverride::UseDefault, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(LimiterError::Timeout(_))));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(limiter.try_acquire(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_every_tier_and_wakes_waiters() {
        let limiter = MultiRateLimiter::new(tiers(&[(2, 10), (4, 60)]), Behavior::Block).unwrap();
        assert!(limiter.try_acquire(2));

        let mut task = tokio_test::task::spawn(limiter.acquire(1, BehaviorOverride::UseDefault));
        assert_pending!(task.poll());

        limiter.reset();
        assert!(task.is_woken());
        assert!(assert_ready!(task.poll()).unwrap());
        drop(task);

        let status = limiter.status();
        assert_eq!(status[0].available_tokens, 1.0);
        assert_eq!(status[1].available_tokens, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_retry_policy() {
        let limiter = MultiRateLimiter::new(tiers(&[(1, 1), (10, 10)]), Behavior::Block)
            .unwrap()
            .with_wait_policy(WaitPolicy::SingleRetry);
        assert!(limiter.try_acquire(1));

        let mut task = tokio_test::task::spawn(limiter.acquire(1, BehaviorOverride::UseDefault));
        assert_pending!(task.poll());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire(1));

        assert!(!assert_ready!(task.poll()).unwrap());
    }
}
