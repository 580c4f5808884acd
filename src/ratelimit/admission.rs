//! The admission loop shared by single- and multi-tier limiters.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::behavior::{Behavior, WaitPolicy};
use crate::error::{LimiterError, Result};

/// Per-limiter parameters the admission loop needs besides the check itself.
pub(crate) struct Gate<'a> {
    /// Largest request that can ever be admitted
    pub capacity: u32,
    pub policy: WaitPolicy,
    /// Woken on reset so blocked callers re-check early
    pub notify: &'a Notify,
}

/// Run one acquisition.
///
/// `try_admit` refills, checks and debits as a single locked step. It returns
/// `Err(wait)` with the time until the request could fit when it cannot be
/// admitted now. No lock is held across the awaits below, and the bucket is
/// only debited inside `try_admit`, so an abandoned wait consumes nothing.
pub(crate) async fn admit<F, C>(
    gate: Gate<'_>,
    tokens: u32,
    behavior: Behavior,
    mut try_admit: F,
    cancel: C,
) -> Result<bool>
where
    F: FnMut() -> std::result::Result<(), Duration>,
    C: Future<Output = ()>,
{
    if tokens == 0 {
        return Ok(true);
    }

    tokio::pin!(cancel);
    let mut waited = false;

    loop {
        // Registered before the check so a reset in between is not missed.
        let reset = gate.notify.notified();

        let wait = match try_admit() {
            Ok(()) => {
                trace!(tokens, waited, "Tokens acquired");
                return Ok(true);
            }
            Err(wait) => wait,
        };

        match behavior {
            Behavior::Skip => {
                trace!(tokens, "Not enough tokens, skipping");
                return Ok(false);
            }
            Behavior::Raise => {
                // Waiting can never make room for more than capacity.
                let retry_after = if tokens > gate.capacity {
                    Duration::MAX
                } else {
                    wait
                };
                trace!(tokens, retry_after = ?retry_after, "Not enough tokens, raising");
                return Err(LimiterError::RateLimitExceeded { retry_after });
            }
            Behavior::Block => {}
        }

        if tokens > gate.capacity {
            return Err(LimiterError::ExceedsCapacity {
                requested: tokens,
                capacity: gate.capacity,
            });
        }

        if waited && gate.policy == WaitPolicy::SingleRetry {
            debug!(tokens, "Still not enough tokens after waiting once");
            return Ok(false);
        }

        debug!(tokens, wait = ?wait, "Waiting for tokens");
        waited = true;

        tokio::select! {
            biased;
            _ = &mut cancel => {
                debug!(tokens, "Acquisition cancelled while waiting");
                return Err(LimiterError::Cancelled);
            }
            _ = reset => {
                trace!(tokens, "Woken by reset");
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
