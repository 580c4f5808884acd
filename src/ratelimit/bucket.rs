//! Token bucket, the base quota primitive.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::admission::{admit, Gate};
use super::behavior::{Behavior, BehaviorOverride, WaitPolicy};
use super::tier::{LimiterStatus, Tier};
use crate::error::{LimiterError, Result};

/// Fixed-point scale for token accounting.
pub(crate) const NANOTOKENS_PER_TOKEN: u64 = 1_000_000_000;

/// Mutable part of a bucket, always read and written under the bucket lock.
#[derive(Debug, Clone, Copy)]
struct BucketState {
    /// Available budget in nanotokens
    nanotokens: u64,
    /// Refill numerator left over from the last division, so no elapsed time is lost
    residue: u128,
    /// When refill was last computed
    last_refill: Instant,
}

impl BucketState {
    fn full(tier: &Tier, now: Instant) -> Self {
        Self {
            nanotokens: capacity_nanotokens(tier),
            residue: 0,
            last_refill: now,
        }
    }

    /// Add the tokens earned since the last refill, capped at capacity.
    fn refill(&mut self, tier: &Tier, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;

        let capacity = capacity_nanotokens(tier);
        if self.nanotokens >= capacity {
            self.residue = 0;
            return;
        }

        let period = tier.period().as_nanos();
        let earned = elapsed
            .as_nanos()
            .saturating_mul(tier.limit() as u128 * NANOTOKENS_PER_TOKEN as u128)
            .saturating_add(self.residue);
        let added = earned / period;
        let room = (capacity - self.nanotokens) as u128;

        if added >= room {
            self.nanotokens = capacity;
            self.residue = 0;
        } else {
            self.nanotokens += added as u64;
            self.residue = earned % period;
        }
    }

    /// Time until `shortfall` more nanotokens will have been refilled.
    ///
    /// Saturates at `Duration::MAX` for periods too long to represent the wait.
    fn time_to_refill(&self, tier: &Tier, shortfall: u64) -> Duration {
        let per_nano = tier.limit() as u128 * NANOTOKENS_PER_TOKEN as u128;
        let needed = match (shortfall as u128).checked_mul(tier.period().as_nanos()) {
            Some(needed) => needed.saturating_sub(self.residue),
            None => return Duration::MAX,
        };
        let nanos = needed.div_ceil(per_nano);
        let nanos_per_sec = NANOTOKENS_PER_TOKEN as u128;
        match u64::try_from(nanos / nanos_per_sec) {
            Ok(secs) => Duration::new(secs, (nanos % nanos_per_sec) as u32),
            Err(_) => Duration::MAX,
        }
    }

    fn tokens(&self) -> f64 {
        self.nanotokens as f64 / NANOTOKENS_PER_TOKEN as f64
    }
}

fn capacity_nanotokens(tier: &Tier) -> u64 {
    tier.limit() as u64 * NANOTOKENS_PER_TOKEN
}

/// A token bucket holding up to `limit` tokens, refilled continuously at
/// `limit / period`.
///
/// Refill and debit happen under one lock, so concurrent callers never
/// consume the same token. The bucket runs no background task; refill is
/// computed lazily from elapsed time whenever the state is touched.
#[derive(Debug)]
pub struct TokenBucket {
    tier: Tier,
    behavior: Behavior,
    wait_policy: WaitPolicy,
    state: Mutex<BucketState>,
    reset_notify: Notify,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// Fails with [`LimiterError::InvalidConfiguration`] if `limit` or `period` is zero.
    pub fn new(limit: u32, period: Duration, behavior: Behavior) -> Result<Self> {
        Ok(Self::from_tier(Tier::new(limit, period)?, behavior))
    }

    /// Create a full bucket for an already validated tier.
    pub fn from_tier(tier: Tier, behavior: Behavior) -> Self {
        Self {
            tier,
            behavior,
            wait_policy: WaitPolicy::default(),
            state: Mutex::new(BucketState::full(&tier, Instant::now())),
            reset_notify: Notify::new(),
        }
    }

    /// Set how blocked acquisitions behave after their first wait.
    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    pub fn limit(&self) -> u32 {
        self.tier.limit()
    }

    pub fn period(&self) -> Duration {
        self.tier.period()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Default behavior used when a call passes [`BehaviorOverride::UseDefault`].
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait_policy
    }

    /// Acquire `tokens`, applying the effective behavior if they are not available.
    ///
    /// Returns `Ok(true)` when admitted and `Ok(false)` when not admitted
    /// without an error (`Skip`, or `Block` under [`WaitPolicy::SingleRetry`]).
    /// Dropping the returned future while it waits cancels the request
    /// without consuming tokens.
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
            capacity: self.limit(),
            policy: self.wait_policy,
            notify: &self.reset_notify,
        };
        admit(gate, tokens, behavior, || self.try_debit(tokens), cancel).await
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
                debug!(tokens, timeout = ?timeout, "Timed out waiting for tokens");
                Err(LimiterError::Timeout(timeout))
            }
        }
    }

    /// Take `tokens` if they are available right now. Never waits.
    pub fn try_acquire(&self, tokens: u32) -> bool {
        tokens == 0 || self.try_debit(tokens).is_ok()
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

    /// Refill the bucket to capacity and wake any blocked callers.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            *state = BucketState::full(&self.tier, Instant::now());
        }
        debug!(limit = self.limit(), period = ?self.period(), "Token bucket reset");
        self.reset_notify.notify_waiters();
    }

    /// Currently available tokens, including refill up to now.
    pub fn available_tokens(&self) -> f64 {
        self.snapshot().tokens()
    }

    /// Zero if a whole token is available, otherwise the time until one is.
    pub fn time_until_next_token(&self) -> Duration {
        let state = self.snapshot();
        if state.nanotokens >= NANOTOKENS_PER_TOKEN {
            Duration::ZERO
        } else {
            state.time_to_refill(&self.tier, NANOTOKENS_PER_TOKEN - state.nanotokens)
        }
    }

    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            limit: self.limit(),
            period: self.period(),
            available_tokens: self.available_tokens(),
        }
    }

    /// Refill then debit `tokens` as one locked step.
    ///
    /// On shortfall nothing is debited and the time until the request would
    /// fit is returned.
    pub(crate) fn try_debit(&self, tokens: u32) -> std::result::Result<(), Duration> {
        let requested = tokens as u64 * NANOTOKENS_PER_TOKEN;
        let mut state = self.state.lock();
        state.refill(&self.tier, Instant::now());

        if state.nanotokens >= requested {
            state.nanotokens -= requested;
            Ok(())
        } else {
            Err(state.time_to_refill(&self.tier, requested - state.nanotokens))
        }
    }

    /// Refill and report how long until `tokens` would fit, without debiting.
    pub(crate) fn shortfall(&self, tokens: u32) -> Option<Duration> {
        let requested = tokens as u64 * NANOTOKENS_PER_TOKEN;
        let mut state = self.state.lock();
        state.refill(&self.tier, Instant::now());

        if state.nanotokens >= requested {
            None
        } else {
            Some(state.time_to_refill(&self.tier, requested - state.nanotokens))
        }
    }

    /// Refilled copy of the state; the live bucket is left untouched.
    fn snapshot(&self) -> BucketState {
        let mut state = *self.state.lock();
        state.refill(&self.tier, Instant::now());
        state
    }
}
