//! Retry policy with exponential backoff and jitter.
//!
//! The policy is plain data: callers own the retry loop (so borrows across
//! attempts stay simple) and ask the policy how long to sleep between
//! attempts. Used for optimistic-concurrency retries on aggregate saves and
//! for transient transport failures in the publisher.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    backoff_multiplier: f64,
    max_backoff: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// A policy allowing `max_attempts` retries with default backoff
    /// (50ms initial, doubling, capped at 5s, jittered).
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
            jitter: true,
        }
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the growth factor between consecutive retries.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Cap the delay between retries.
    #[must_use]
    pub const fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Enable or disable randomized jitter (50-100% of the computed delay).
    /// Jitter avoids synchronized retry storms when many writers conflict
    /// on the same contended aggregate.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// How many retries are allowed after the first attempt.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to sleep before retry number `attempt` (1-based).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff.as_millis() as f64);
        let millis = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
