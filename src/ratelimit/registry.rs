//! Named limiters shared between call sites.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::backend::RateLimit;
use super::bucket::TokenBucket;
use super::multi::MultiRateLimiter;
use super::shared::SharedRateLimiter;
use super::tier::LimiterStatus;
use crate::config::{LimiterConfig, QuotagateConfig};
use crate::error::Result;

/// A set of named limiters.
///
/// Every call site that looks up the same name gets the same instance, and
/// therefore draws from one pooled quota. The registry is an ordinary value:
/// build one and pass it (or an `Arc` of it) to whatever needs it. Names
/// are case-insensitive and stored lowercased.
#[derive(Default)]
pub struct LimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<dyn RateLimit>>>,
}

impl LimiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one limiter per configured entry.
    pub fn from_config(config: &QuotagateConfig) -> Result<Self> {
        let registry = Self::new();
        for (name, limiter_config) in &config.limiters {
            registry.register(name, build_limiter(limiter_config)?);
        }
        info!(limiters = registry.len(), "Limiter registry built");
        Ok(registry)
    }

    /// Add or replace a limiter, returning the one it replaced.
    pub fn register(&self, name: &str, limiter: Arc<dyn RateLimit>) -> Option<Arc<dyn RateLimit>> {
        debug!(limiter = %name, "Registering limiter");
        self.limiters.write().insert(name.to_lowercase(), limiter)
    }

    /// Look up a limiter by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RateLimit>> {
        self.limiters.read().get(&name.to_lowercase()).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn RateLimit>> {
        self.limiters.write().remove(&name.to_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.read().is_empty()
    }

    /// Restore every limiter to full capacity.
    ///
    /// This is primarily useful for testing.
    pub fn reset_all(&self) {
        for limiter in self.limiters.read().values() {
            limiter.reset();
        }
    }

    /// Status snapshots of every limiter, keyed by name.
    pub fn status(&self) -> BTreeMap<String, Vec<LimiterStatus>> {
        self.limiters
            .read()
            .iter()
            .map(|(name, limiter)| (name.clone(), limiter.status()))
            .collect()
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("limiters", &self.names())
            .finish()
    }
}

/// Build the limiter a configuration entry describes.
pub fn build_limiter(config: &LimiterConfig) -> Result<Arc<dyn RateLimit>> {
    let mut tiers = config.to_tiers()?;

    if tiers.len() == 1 {
        let bucket = TokenBucket::from_tier(tiers.remove(0), config.behavior)
            .with_wait_policy(config.wait_policy);
        Ok(Arc::new(SharedRateLimiter::from_bucket(bucket)))
    } else {
        let limiter =
            MultiRateLimiter::new(tiers, config.behavior)?.with_wait_policy(config.wait_policy);
        Ok(Arc::new(limiter))
    }
}
