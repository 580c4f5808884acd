//! Error types for quotagate limiters.

use std::time::Duration;
use thiserror::Error;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A limiter was constructed with an unusable quota
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Not enough tokens and the effective behavior is `Raise`
    #[error("Rate limit exceeded, next admission possible in {retry_after:?}")]
    RateLimitExceeded {
        /// How long until the request could have been admitted.
        /// `Duration::MAX` when it asks for more than the quota's capacity.
        retry_after: Duration,
    },

    /// The request asks for more tokens than the quota can ever hold
    #[error("Requested {requested} tokens but capacity is {capacity}")]
    ExceedsCapacity { requested: u32, capacity: u32 },

    /// The caller's cancellation signal fired while waiting for tokens
    #[error("Acquisition cancelled while waiting for tokens")]
    Cancelled,

    /// The caller's deadline passed while waiting for tokens
    #[error("Timed out after {0:?} waiting for tokens")]
    Timeout(Duration),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Whether the error reflects the caller giving up rather than quota exhaustion.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LimiterError::Cancelled | LimiterError::Timeout(_))
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
