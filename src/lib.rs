//! Quotagate - In-process Rate Limiting
//!
//! This crate gates how often callers may perform an operation, typically an
//! outbound call to a throttled remote service. It provides a token bucket,
//! a cloneable handle for pooling one quota across call sites, and a
//! multi-tier limiter that enforces several windows at once
//! ("10 per second AND 100 per minute").
//!
//! ```no_run
//! use std::time::Duration;
//! use quotagate::ratelimit::{Behavior, BehaviorOverride, SharedRateLimiter};
//!
//! # async fn run() -> quotagate::error::Result<()> {
//! let limiter = SharedRateLimiter::new(5, Duration::from_secs(1), Behavior::Block)?;
//! let for_another_client = limiter.clone();
//!
//! if limiter.acquire(1, BehaviorOverride::UseDefault).await? {
//!     // perform the throttled call
//! }
//! # drop(for_another_client);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{LimiterError, Result};
pub use ratelimit::{
    Behavior, BehaviorOverride, MultiRateLimiter, RateLimit, SharedRateLimiter, Tier, TokenBucket,
};
