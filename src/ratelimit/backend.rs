//! Limiter trait for abstracting over single, shared and multi-tier quotas.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

use super::behavior::BehaviorOverride;
use super::bucket::TokenBucket;
use super::multi::MultiRateLimiter;
use super::shared::SharedRateLimiter;
use super::tier::LimiterStatus;
use crate::error::Result;

/// Trait for limiter implementations.
///
/// A request-dispatch layer holds an `Arc<dyn RateLimit>` and calls
/// [`acquire`](RateLimit::acquire) right before each throttled call, without
/// caring which quota topology sits behind it. To abandon a blocked
/// acquisition, drop the future (for example with `tokio::time::timeout`);
/// no tokens are consumed in that case.
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Acquire `tokens`, returning whether the guarded operation may proceed.
    async fn acquire(&self, tokens: u32, behavior: BehaviorOverride) -> Result<bool>;

    /// Take `tokens` only if they are available right now.
    fn try_acquire(&self, tokens: u32) -> bool;

    /// Restore full capacity.
    fn reset(&self);

    /// One snapshot per enforced quota.
    fn status(&self) -> Vec<LimiterStatus>;

    /// Time until a single-token request could be admitted.
    fn time_until_ready(&self) -> Duration;
}

#[async_trait]
impl RateLimit for TokenBucket {
    async fn acquire(&self, tokens: u32, behavior: BehaviorOverride) -> Result<bool> {
        TokenBucket::acquire(self, tokens, behavior).await
    }

    fn try_acquire(&self, tokens: u32) -> bool {
        TokenBucket::try_acquire(self, tokens)
    }

    fn reset(&self) {
        TokenBucket::reset(self)
    }

    fn status(&self) -> Vec<LimiterStatus> {
        vec![TokenBucket::status(self)]
    }

    fn time_until_ready(&self) -> Duration {
        self.time_until_next_token()
    }
}

#[async_trait]
impl RateLimit for SharedRateLimiter {
    async fn acquire(&self, tokens: u32, behavior: BehaviorOverride) -> Result<bool> {
        SharedRateLimiter::acquire(self, tokens, behavior).await
    }

    fn try_acquire(&self, tokens: u32) -> bool {
        SharedRateLimiter::try_acquire(self, tokens)
    }

    fn reset(&self) {
        SharedRateLimiter::reset(self)
    }

    fn status(&self) -> Vec<LimiterStatus> {
        vec![SharedRateLimiter::status(self)]
    }

    fn time_until_ready(&self) -> Duration {
        self.time_until_next_token()
    }
}

#[async_trait]
impl RateLimit for MultiRateLimiter {
    async fn acquire(&self, tokens: u32, behavior: BehaviorOverride) -> Result<bool> {
        MultiRateLimiter::acquire(self, tokens, behavior).await
    }

    fn try_acquire(&self, tokens: u32) -> bool {
        MultiRateLimiter::try_acquire(self, tokens)
    }

    fn reset(&self) {
        MultiRateLimiter::reset(self)
    }

    fn status(&self) -> Vec<LimiterStatus> {
        MultiRateLimiter::status(self)
    }

    fn time_until_ready(&self) -> Duration {
        MultiRateLimiter::time_until_ready(self)
    }
}

/// Run `operation` only if `limiter` admits the request.
///
/// Returns `Ok(Some(output))` when admitted, `Ok(None)` when not admitted
/// (the operation is never started), and propagates limiter errors as-is.
pub async fn guarded<L, F>(
    limiter: &L,
    tokens: u32,
    behavior: BehaviorOverride,
    operation: F,
) -> Result<Option<F::Output>>
where
    L: RateLimit + ?Sized,
    F: Future,
{
    if limiter.acquire(tokens, behavior).await? {
        Ok(Some(operation.await))
    } else {
        trace!(tokens, "Request not admitted, skipping guarded operation");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;
    use crate::ratelimit::{Behavior, Tier};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);

    fn limiters() -> Vec<Arc<dyn RateLimit>> {
        vec![
            Arc::new(TokenBucket::new(2, HOUR, Behavior::Skip).unwrap()),
            Arc::new(SharedRateLimiter::new(2, HOUR, Behavior::Skip).unwrap()),
            Arc::new(
                MultiRateLimiter::new(
                    vec![Tier::per_hour(2).unwrap(), Tier::per_day(50).unwrap()],
                    Behavior::Skip,
                )
                .unwrap(),
            ),
        ]
    }

    #[tokio::test]
    async fn test_trait_objects_share_contract() {
        for limiter in limiters() {
            assert!(limiter.acquire(1, BehaviorOverride::UseDefault).await.unwrap());
            assert!(limiter.try_acquire(1));
            assert!(!limiter.acquire(1, BehaviorOverride::UseDefault).await.unwrap());
            assert!(limiter.time_until_ready() > Duration::ZERO);

            limiter.reset();
            assert_eq!(limiter.time_until_ready(), Duration::ZERO);
            assert!(!limiter.status().is_empty());
        }
    }

    #[tokio::test]
    async fn test_guarded_runs_operation_only_when_admitted() {
        let limiter = TokenBucket::new(1, HOUR, Behavior::Skip).unwrap();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let call = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            "response"
        };

        let first = guarded(&limiter, 1, BehaviorOverride::UseDefault, call()).await;
        assert_eq!(first.unwrap(), Some("response"));

        let second = guarded(&limiter, 1, BehaviorOverride::UseDefault, call()).await;
        assert_eq!(second.unwrap(), None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guarded_propagates_errors() {
        let limiter: Arc<dyn RateLimit> =
            Arc::new(TokenBucket::new(1, HOUR, Behavior::Raise).unwrap());
        assert!(limiter.try_acquire(1));

        let result = guarded(limiter.as_ref(), 1, BehaviorOverride::UseDefault, async { 42 }).await;
        assert!(matches!(result, Err(LimiterError::RateLimitExceeded { .. })));
    }
}
