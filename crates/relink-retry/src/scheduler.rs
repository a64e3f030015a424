//! Retry planning and the per-connection retry timer.

use crate::policy::BackoffPolicy;
use relink_core::{Schedule, TimerHandle};
use std::time::Duration;
use thiserror::Error;

/// The policy's retry limit was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reconnect attempts exhausted after {attempts} retries (limit {max_attempts})")]
pub struct RetriesExhausted {
    /// Retries made before giving up.
    pub attempts: u32,
    /// The configured limit.
    pub max_attempts: u32,
}

/// Computes the delay before retry `retry` (1-indexed), or reports that the
/// policy does not allow it.
pub fn plan(policy: &BackoffPolicy, retry: u32) -> Result<Duration, RetriesExhausted> {
    if let Some(max_attempts) = policy.attempt_limit() {
        if retry > max_attempts {
            return Err(RetriesExhausted {
                attempts: retry.saturating_sub(1),
                max_attempts,
            });
        }
    }
    Ok(policy.delay_for(retry))
}

/// Owns the one retry timer a connection may have armed.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    pending: Option<TimerHandle>,
}

impl RetryScheduler {
    /// Creates a scheduler with no timer armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the retry timer on `ctx`, replacing any timer still pending.
    pub fn arm<S, W>(&mut self, ctx: &S, delay: Duration, work: W)
    where
        S: Schedule<W> + ?Sized,
    {
        self.cancel();

        #[cfg(feature = "tracing")]
        tracing::debug!(delay_ms = delay.as_millis() as u64, "arming retry timer");

        self.pending = Some(ctx.schedule(delay, work));
    }

    /// Cancels the pending timer, if any. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.cancel();
        }
    }

    /// Forgets a timer that already fired.
    pub fn disarm(&mut self) {
        self.pending = None;
    }

    /// Returns true while a timer is armed and not yet fired or cancelled.
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|timer| !timer.is_cancelled())
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
