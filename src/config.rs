//! Configuration management for quotagate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{Behavior, Tier, TimeUnit, WaitPolicy};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "QUOTAGATE";

/// Main configuration: logging plus a set of named limiters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotagateConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Limiters by name
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One named limiter. A single tier builds a shared token bucket, several
/// tiers build a multi-tier limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Quota windows, all enforced together
    pub tiers: Vec<TierConfig>,

    /// What to do when a request cannot be admitted immediately
    #[serde(default)]
    pub behavior: Behavior,

    /// How blocked requests retry
    #[serde(default)]
    pub wait_policy: WaitPolicy,
}

/// A quota window: `limit` tokens every `every` `unit`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Number of tokens per window
    pub limit: u32,

    /// The time unit
    pub unit: TimeUnit,

    /// Window length in units
    #[serde(default = "default_every")]
    pub every: u32,
}

fn default_every() -> u32 {
    1
}

impl TierConfig {
    /// Validate into a [`Tier`].
    pub fn to_tier(&self) -> Result<Tier> {
        Tier::new(self.limit, self.unit.duration() * self.every)
    }
}

impl LimiterConfig {
    /// Validate every tier, rejecting an empty list.
    pub fn to_tiers(&self) -> Result<Vec<Tier>> {
        if self.tiers.is_empty() {
            return Err(LimiterError::InvalidConfiguration(
                "at least one tier is required".to_string(),
            ));
        }
        self.tiers.iter().map(TierConfig::to_tier).collect()
    }
}

impl QuotagateConfig {
    /// Load configuration from a YAML file, layered with `QUOTAGATE_*`
    /// environment variables (`__` separates nested keys, e.g.
    /// `QUOTAGATE_LOGGING__LEVEL=debug`).
    ///
    /// Limiter names come back lowercased, as with every other loader.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading limiter configuration");

        if !path.exists() {
            return Err(LimiterError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("configuration file {} not found", path.display()),
            )));
        }

        let config: QuotagateConfig = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))?;

        let config = config.normalize_names()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QuotagateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))?;
        let config = config.normalize_names()?;
        config.validate()?;
        Ok(config)
    }

    /// Lowercase every limiter name. Names that differ only in case collide.
    fn normalize_names(mut self) -> Result<Self> {
        let mut limiters = BTreeMap::new();
        for (name, limiter) in std::mem::take(&mut self.limiters) {
            if limiters.insert(name.to_lowercase(), limiter).is_some() {
                return Err(LimiterError::InvalidConfiguration(format!(
                    "limiter '{}' is defined more than once (names are case-insensitive)",
                    name
                )));
            }
        }
        self.limiters = limiters;
        Ok(self)
    }

    /// Check that every limiter describes a usable quota.
    pub fn validate(&self) -> Result<()> {
        for (name, limiter) in &self.limiters {
            limiter.to_tiers().map_err(|e| match e {
                LimiterError::InvalidConfiguration(msg) => {
                    LimiterError::InvalidConfiguration(format!("limiter '{}': {}", name, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}
