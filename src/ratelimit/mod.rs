//! Token bucket rate limiting: single, shared and multi-tier quotas.

mod admission;
mod backend;
mod behavior;
mod bucket;
mod multi;
mod registry;
mod shared;
mod tier;

pub use backend::{guarded, RateLimit};
pub use behavior::{Behavior, BehaviorOverride, WaitPolicy};
pub use bucket::TokenBucket;
pub use multi::MultiRateLimiter;
pub use registry::{build_limiter, LimiterRegistry};
pub use shared::SharedRateLimiter;
pub use tier::{LimiterStatus, Tier, TimeUnit};
