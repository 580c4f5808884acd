//! Quota windows and status snapshots.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LimiterError, Result};

/// Time unit for quota windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" | "sec" | "second" | "seconds" => Some(TimeUnit::Second),
            "m" | "min" | "minute" | "minutes" => Some(TimeUnit::Minute),
            "h" | "hour" | "hours" => Some(TimeUnit::Hour),
            "d" | "day" | "days" => Some(TimeUnit::Day),
            _ => None,
        }
    }
}

/// One enforcement window: at most `limit` tokens per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tier {
    limit: u32,
    period: Duration,
}

impl Tier {
    /// Create a tier, rejecting a zero limit or a zero period.
    pub fn new(limit: u32, period: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(LimiterError::InvalidConfiguration(
                "limit must be greater than 0".to_string(),
            ));
        }
        if period.is_zero() {
            return Err(LimiterError::InvalidConfiguration(
                "period must be greater than 0".to_string(),
            ));
        }
        Ok(Self { limit, period })
    }

    pub fn per_second(limit: u32) -> Result<Self> {
        Self::new(limit, TimeUnit::Second.duration())
    }

    pub fn per_minute(limit: u32) -> Result<Self> {
        Self::new(limit, TimeUnit::Minute.duration())
    }

    pub fn per_hour(limit: u32) -> Result<Self> {
        Self::new(limit, TimeUnit::Hour.duration())
    }

    pub fn per_day(limit: u32) -> Result<Self> {
        Self::new(limit, TimeUnit::Day.duration())
    }

    /// Maximum tokens, which is also the burst size.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Time over which `limit` tokens are replenished.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.limit, self.period)
    }
}

impl FromStr for Tier {
    type Err = LimiterError;

    /// Parse `"<limit>/<unit>"` or `"<limit>/<count><unit>"`, e.g. `10/s` or `5/2s`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LimiterError::InvalidConfiguration(format!("invalid tier '{}'", s));

        let (limit, window) = s.trim().split_once('/').ok_or_else(invalid)?;
        let limit: u32 = limit.trim().parse().map_err(|_| invalid())?;

        let window = window.trim();
        let split = window
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (count, suffix) = window.split_at(split);
        let count: u32 = if count.is_empty() {
            1
        } else {
            count.parse().map_err(|_| invalid())?
        };
        let unit = TimeUnit::from_suffix(&suffix.trim().to_ascii_lowercase()).ok_or_else(invalid)?;

        Tier::new(limit, unit.duration() * count)
    }
}

/// Read-only projection of one quota's state, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimiterStatus {
    pub limit: u32,
    #[serde(rename = "period_secs", serialize_with = "serialize_secs")]
    pub period: Duration,
    pub available_tokens: f64,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
