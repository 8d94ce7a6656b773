// feedforward-providers/src/retry.rs
// ============================================================================
// Module: Retry & Backoff
// Description: Exponential backoff with jitter for transient failures.
// Purpose: Give every HTTP-backed collaborator one shared retry policy.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! A `429`/5xx response or connection failure is retried with exponential
//! backoff capped at `max_attempts`; a `Retry-After` header, when present,
//! overrides the computed delay. Permanent 4xx failures are never retried.

use std::time::Duration;

use rand::Rng;

/// Backoff policy shared by the ticketing, LLM, and embedding clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base: Duration::from_millis(250),
            cap: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay before attempt number `attempt` (1-indexed),
    /// full jitter between zero and the exponential bound.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(16));
        let bound = exp.min(self.cap.as_millis());
        let bound_u64 = u64::try_from(bound).unwrap_or(u64::MAX);
        let jittered = rand::thread_rng().gen_range(0..=bound_u64.max(1));
        Duration::from_millis(jittered)
    }
}

/// Whether a category of failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given override delay, or the computed backoff if `None`.
    Retry {
        /// Explicit delay (e.g. from `Retry-After`), overriding backoff math.
        retry_after: Option<Duration>,
    },
    /// Do not retry; the failure is permanent.
    Abort,
}

#[cfg(test)]
mod tests {
    use super::BackoffPolicy;

    #[test]
    fn delay_grows_with_attempt_but_stays_capped() {
        let policy = BackoffPolicy::default();
        let late = policy.delay_for_attempt(20);
        assert!(late <= policy.cap);
    }
}
