//! Policies applied when a request cannot be admitted immediately.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LimiterError;

/// What a limiter does when there are not enough tokens for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Wait until enough tokens have been refilled
    #[default]
    Block,
    /// Fail immediately with [`LimiterError::RateLimitExceeded`]
    Raise,
    /// Report "not admitted" without waiting or erroring
    Skip,
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Behavior::Block => "block",
            Behavior::Raise => "raise",
            Behavior::Skip => "skip",
        };
        f.write_str(name)
    }
}

impl FromStr for Behavior {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Behavior::Block),
            "raise" => Ok(Behavior::Raise),
            "skip" => Ok(Behavior::Skip),
            other => Err(LimiterError::InvalidConfiguration(format!(
                "unknown behavior '{}', expected block, raise or skip",
                other
            ))),
        }
    }
}

/// Per-call behavior, layered over a limiter's default.
///
/// `UseDefault` defers to whatever [`Behavior`] the limiter was built with.
/// A plain [`Behavior`] converts into the matching explicit override, so
/// call sites can pass either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BehaviorOverride {
    #[default]
    UseDefault,
    Block,
    Raise,
    Skip,
}

impl BehaviorOverride {
    /// Resolve against the limiter's default behavior.
    pub fn resolve(self, default: Behavior) -> Behavior {
        match self {
            BehaviorOverride::UseDefault => default,
            BehaviorOverride::Block => Behavior::Block,
            BehaviorOverride::Raise => Behavior::Raise,
            BehaviorOverride::Skip => Behavior::Skip,
        }
    }
}

impl From<Behavior> for BehaviorOverride {
    fn from(behavior: Behavior) -> Self {
        match behavior {
            Behavior::Block => BehaviorOverride::Block,
            Behavior::Raise => BehaviorOverride::Raise,
            Behavior::Skip => BehaviorOverride::Skip,
        }
    }
}

impl From<Option<Behavior>> for BehaviorOverride {
    fn from(behavior: Option<Behavior>) -> Self {
        behavior.map_or(BehaviorOverride::UseDefault, Into::into)
    }
}

/// How a blocked acquisition proceeds after its first wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Keep waiting and re-checking until admitted or cancelled
    #[default]
    UntilAdmitted,
    /// Wait once, re-check once, and report "not admitted" if still short
    SingleRetry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_resolution() {
        assert_eq!(BehaviorOverride::UseDefault.resolve(Behavior::Raise), Behavior::Raise);
        assert_eq!(BehaviorOverride::Skip.resolve(Behavior::Block), Behavior::Skip);
        assert_eq!(BehaviorOverride::from(Behavior::Block), BehaviorOverride::Block);
        assert_eq!(BehaviorOverride::from(None), BehaviorOverride::UseDefault);
        assert_eq!(
            BehaviorOverride::from(Some(Behavior::Raise)),
            BehaviorOverride::Raise
        );
    }

    #[test]
    fn test_behavior_from_str() {
        assert_eq!("block".parse::<Behavior>().unwrap(), Behavior::Block);
        assert_eq!(" Raise ".parse::<Behavior>().unwrap(), Behavior::Raise);
        assert_eq!("SKIP".parse::<Behavior>().unwrap(), Behavior::Skip);
        assert!("drop".parse::<Behavior>().is_err());
    }

    #[test]
    fn test_behavior_serde_names() {
        let behavior: Behavior = serde_yaml::from_str("skip").unwrap();
        assert_eq!(behavior, Behavior::Skip);

        let policy: WaitPolicy = serde_yaml::from_str("single_retry").unwrap();
        assert_eq!(policy, WaitPolicy::SingleRetry);
        assert_eq!(WaitPolicy::default(), WaitPolicy::UntilAdmitted);
    }
}
