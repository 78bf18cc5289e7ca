//! Retry delay computation
//!
//! Exponential backoff with a multiplicative factor, a delay cap, and
//! uniform random jitter so concurrent jobs retrying against the same
//! source don't synchronize into retry storms.

use crate::config::RetrySpec;
use crate::engine::fetcher::FailureKind;
use rand::Rng;
use std::time::Duration;

/// Decides whether and when a failed attempt is retried
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    factor: f64,
    cap: Duration,
    jitter: f64,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_spec(spec: &RetrySpec) -> Self {
        Self {
            base: Duration::from_millis(spec.base_delay_ms),
            factor: spec.factor,
            cap: Duration::from_millis(spec.max_delay_ms),
            jitter: spec.jitter,
            max_attempts: spec.max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic portion of the delay for a given attempt (1-based):
    /// base × factor^(attempt-1), capped. Monotonically non-decreasing in
    /// the attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }

    /// Delay before retrying the given attempt, with jitter applied.
    ///
    /// Bounded above by cap × (1 + jitter fraction).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }

        let spread = base.as_secs_f64() * self.jitter;
        let jittered = base.as_secs_f64() + rand::thread_rng().gen_range(0.0..spread.max(f64::MIN_POSITIVE));
        Duration::from_secs_f64(jittered)
    }

    /// Whether a failure of this kind on this attempt should be retried.
    ///
    /// Only transient failures qualify, and only while attempts remain;
    /// `attempt` counts the attempt that just failed.
    pub fn is_retryable(&self, kind: FailureKind, attempt: u32) -> bool {
        kind.is_transient() && attempt < self.max_attempts
    }
}
