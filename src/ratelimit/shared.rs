//! A single quota pooled across unrelated call sites.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::behavior::{Behavior, BehaviorOverride};
use super::bucket::TokenBucket;
use super::tier::LimiterStatus;
use crate::error::Result;

/// Cloneable handle to one [`TokenBucket`].
///
/// Every clone draws from the same bucket, so the combined rate of all the
/// call sites holding a clone is bounded by the one configured quota. All
/// operations forward to the bucket unchanged.
#[derive(Debug, Clone)]
pub struct SharedRateLimiter {
    bucket: Arc<TokenBucket>,
}

impl SharedRateLimiter {
    pub fn new(limit: u32, period: Duration, behavior: Behavior) -> Result<Self> {
        Ok(Self::from_bucket(TokenBucket::new(limit, period, behavior)?))
    }

    pub fn from_bucket(bucket: TokenBucket) -> Self {
        Self {
            bucket: Arc::new(bucket),
        }
    }

    /// The bucket every clone of this handle shares.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Whether both handles draw from the same pool.
    pub fn shares_pool_with(&self, other: &SharedRateLimiter) -> bool {
        Arc::ptr_eq(&self.bucket, &other.bucket)
    }

    pub async fn acquire(&self, tokens: u32, behavior: impl Into<BehaviorOverride>) -> Result<bool> {
        self.bucket.acquire(tokens, behavior).await
    }

    pub async fn acquire_with_cancel<C>(
        &self,
        tokens: u32,
        behavior: impl Into<BehaviorOverride>,
        cancel: C,
    ) -> Result<bool>
    where
        C: Future<Output = ()>,
    {
        self.bucket.acquire_with_cancel(tokens, behavior, cancel).await
    }

    pub async fn acquire_timeout(
        &self,
        tokens: u32,
        behavior: impl Into<BehaviorOverride>,
        timeout: Duration,
    ) -> Result<bool> {
        self.bucket.acquire_timeout(tokens, behavior, timeout).await
    }

    pub fn try_acquire(&self, tokens: u32) -> bool {
        self.bucket.try_acquire(tokens)
    }

    pub async fn wait<C>(&self, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        self.bucket.wait(cancel).await
    }

    pub fn reset(&self) {
        self.bucket.reset()
    }

    pub fn available_tokens(&self) -> f64 {
        self.bucket.available_tokens()
    }

    pub fn time_until_next_token(&self) -> Duration {
        self.bucket.time_until_next_token()
    }

    pub fn status(&self) -> LimiterStatus {
        self.bucket.status()
    }
}

impl From<TokenBucket> for SharedRateLimiter {
    fn from(bucket: TokenBucket) -> Self {
        Self::from_bucket(bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_clones_share_one_pool() {
        let limiter = SharedRateLimiter::new(4, HOUR, Behavior::Skip).unwrap();
        let orders = limiter.clone();
        let accounts = limiter.clone();
        assert!(orders.shares_pool_with(&accounts));

        assert!(orders.try_acquire(1));
        assert!(accounts.try_acquire(2));
        assert!(limiter.try_acquire(1));
        assert!(!orders.try_acquire(1));
        assert!(!accounts.try_acquire(1));

        accounts.reset();
        assert!(orders.try_acquire(4));
    }

    #[test]
    fn test_separate_limiters_do_not_share() {
        let a = SharedRateLimiter::new(1, HOUR, Behavior::Skip).unwrap();
        let b = SharedRateLimiter::new(1, HOUR, Behavior::Skip).unwrap();
        assert!(!a.shares_pool_with(&b));

        assert!(a.try_acquire(1));
        assert!(b.try_acquire(1));
    }

    #[test]
    fn test_invalid_quota() {
        assert!(SharedRateLimiter::new(0, HOUR, Behavior::Block).is_err());
    }

    #[tokio::test]
    async fn test_combined_rate_across_tasks() {
        let limiter = SharedRateLimiter::new(10, HOUR, Behavior::Skip).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let mut admitted = 0;
                    for _ in 0..10 {
                        if limiter.acquire(1, BehaviorOverride::UseDefault).await.unwrap() {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 10);
        assert!(limiter.available_tokens() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_blocking_wait() {
        let limiter = SharedRateLimiter::new(1, Duration::from_secs(1), Behavior::Block).unwrap();
        let other_site = limiter.clone();

        limiter.wait(std::future::pending()).await.unwrap();
        assert_eq!(other_site.time_until_next_token(), Duration::from_secs(1));

        let result = other_site
            .acquire_timeout(1, BehaviorOverride::UseDefault, Duration::from_millis(10))
            .await;
        assert!(result.is_err());

        assert!(other_site
            .acquire_with_cancel(1, BehaviorOverride::UseDefault, std::future::pending())
            .await
            .unwrap());
        assert_eq!(limiter.status().limit, 1);
    }
}
