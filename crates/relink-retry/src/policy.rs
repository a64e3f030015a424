//! Resolved backoff policy.

use crate::backoff::{ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, IntervalFunction};
use relink_core::ConfigError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Delay used before the first retry when none is configured.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(10);

/// Growth factor applied between retries when none is configured.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// How long to wait between reconnect attempts, and how many to make.
///
/// The delay before retry `n` (1-indexed) is
/// `min(initial_delay * multiplier^(n-1), max_delay)`, optionally randomized
/// by `jitter` and never above `max_delay`.
#[derive(Clone)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
    jitter: f64,
}

impl BackoffPolicy {
    /// Exponential policy with the given first delay, multiplier 2.0,
    /// no cap and unlimited attempts.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: None,
            max_attempts: None,
            jitter: 0.0,
        }
    }

    /// Constant delay between every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay).multiplier(1.0)
    }

    /// Sets the growth factor between retries.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Caps the delay.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Limits the number of retries after the initial attempt.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Randomizes each delay by up to `factor` of its value.
    pub fn jitter(mut self, factor: f64) -> Self {
        self.jitter = factor;
        self
    }

    /// The delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// The growth factor.
    pub fn growth(&self) -> f64 {
        self.multiplier
    }

    /// The delay cap, if any.
    pub fn delay_cap(&self) -> Option<Duration> {
        self.max_delay
    }

    /// The retry limit, if any.
    pub fn attempt_limit(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Checks the policy for values that can never produce a sane schedule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier));
        }
        if let Some(max_delay) = self.max_delay {
            if max_delay < self.initial_delay {
                return Err(ConfigError::InvalidDelay {
                    initial_delay: self.initial_delay,
                    max_delay,
                });
            }
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidJitter(self.jitter));
        }
        Ok(())
    }

    /// The delay before retry `retry` (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let attempt = retry.saturating_sub(1) as usize;
        let delay = self.interval().next_interval(attempt);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// The interval function this policy resolves to.
    pub fn interval(&self) -> Arc<dyn IntervalFunction> {
        if self.jitter > 0.0 {
            let mut backoff = ExponentialRandomBackoff::new(self.initial_delay, self.jitter)
                .multiplier(self.multiplier);
            if let Some(max) = self.max_delay {
                backoff = backoff.max_interval(max);
            }
            return Arc::new(backoff);
        }

        if self.multiplier == 1.0 {
            let delay = match self.max_delay {
                Some(max) => self.initial_delay.min(max),
                None => self.initial_delay,
            };
            return Arc::new(FixedInterval::new(delay));
        }

        let mut backoff = ExponentialBackoff::new(self.initial_delay).multiplier(self.multiplier);
        if let Some(max) = self.max_delay {
            backoff = backoff.max_interval(max);
        }
        Arc::new(backoff)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY)
    }
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("initial_delay", &self.initial_delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .field("max_attempts", &self.max_attempts)
            .field("jitter", &self.jitter)
            .finish()
    }
}
