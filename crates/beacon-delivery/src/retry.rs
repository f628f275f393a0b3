//! Backoff policy for the retry loop.
//!
//! The default policy waits a fixed five seconds between attempts and never
//! gives up, matching the delivery contract: every failure is transient and
//! the head of the queue is retried until it succeeds. Hosts that prefer a
//! bounded head-of-line block can opt into `max_attempts`, which drops only
//! the record that keeps failing and leaves the order of the rest intact.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wait between attempts, and while waiting for connectivity.
    pub backoff_interval: Duration,

    /// Strategy for growing the wait across consecutive failures.
    pub backoff_strategy: BackoffStrategy,

    /// Upper bound on any computed wait.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,

    /// Consecutive failures after which the head record is dropped.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_interval: Duration::from_millis(crate::DEFAULT_RETRY_INTERVAL_MS),
            backoff_strategy: BackoffStrategy::Fixed,
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.0,
            max_attempts: None,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay between every retry.
    Fixed,
    /// Delay grows by the base interval each attempt.
    Linear,
    /// Delay doubles each attempt.
    Exponential,
}

/// What the retry loop should do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the record at the head and try again after `delay`.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Drop the head record.
    GiveUp {
        /// Reason the record is abandoned
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides what to do after the `attempt_number`-th consecutive failure
    /// (1-based) of the head record.
    pub fn decide(&self, attempt_number: u32, error: &DeliveryError) -> RetryDecision {
        if let Some(max_attempts) = self.max_attempts {
            if attempt_number >= max_attempts {
                return RetryDecision::GiveUp {
                    reason: format!("maximum attempts ({max_attempts}) exceeded: {error}"),
                };
            }
        }

        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        RetryDecision::Retry { delay: self.delay_for(attempt_number) }
    }

    /// Delay before the next attempt after `attempt_number` failures.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let base_delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => Some(self.backoff_interval),
            BackoffStrategy::Linear => self.backoff_interval.checked_mul(attempt_number.max(1)),
            BackoffStrategy::Exponential => {
                let exponent = attempt_number.saturating_sub(1).min(20);
                self.backoff_interval.checked_mul(2_u32.saturating_pow(exponent))
            },
        }
        .unwrap_or(self.max_delay);

        let capped_delay = std::cmp::min(base_delay, self.max_delay);
        let jittered_delay = apply_jitter(capped_delay, self.jitter_factor);

        std::cmp::min(jittered_delay, self.max_delay)
    }
}

/// Randomizes `duration` by ±`jitter_factor`.
///
/// With `jitter_factor = 0.25` a 10s delay becomes 7.5s to 12.5s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_error() -> DeliveryError {
        DeliveryError::transport("connection refused")
    }

    #[test]
    fn default_policy_retries_forever_every_five_seconds() {
        let policy = RetryPolicy::default();

        for attempt in [1, 2, 10, 10_000] {
            assert_eq!(
                policy.decide(attempt, &transport_error()),
                RetryDecision::Retry { delay: Duration::from_secs(5) }
            );
        }
    }

    #[test]
    fn client_error_status_is_retried_by_default() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(50, &DeliveryError::unexpected_status(400));
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }

    #[test]
    fn max_attempts_gives_up_on_head() {
        let policy = RetryPolicy { max_attempts: Some(3), ..Default::default() };

        assert!(matches!(policy.decide(2, &transport_error()), RetryDecision::Retry { .. }));
        match policy.decide(3, &transport_error()) {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("maximum attempts")),
            RetryDecision::Retry { .. } => unreachable!("should give up at max attempts"),
        }
    }

    #[test]
    fn non_retryable_errors_rejected() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(1, &DeliveryError::configuration("no url"));
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn exponential_backoff_increases_correctly() {
        let policy = RetryPolicy {
            backoff_interval: Duration::from_secs(1),
            backoff_strategy: BackoffStrategy::Exponential,
            ..Default::default()
        };

        let delays: Vec<_> = (1..=5).map(|attempt| policy.delay_for(attempt)).collect();

        assert_eq!(delays, [1, 2, 4, 8, 16].map(Duration::from_secs));
    }

    #[test]
    fn linear_backoff_strategy() {
        let policy = RetryPolicy {
            backoff_interval: Duration::from_secs(5),
            backoff_strategy: BackoffStrategy::Linear,
            ..Default::default()
        };

        let delays: Vec<_> = (1..=3).map(|attempt| policy.delay_for(attempt)).collect();

        assert_eq!(delays, [5, 10, 15].map(Duration::from_secs));
    }

    #[test]
    fn max_delay_enforced() {
        let policy = RetryPolicy {
            backoff_interval: Duration::from_secs(1),
            backoff_strategy: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };

        assert_eq!(policy.delay_for(30), Duration::from_secs(60));
    }

    #[test]
    fn overflowing_backoff_saturates_at_max_delay() {
        let interval = Duration::from_millis(u64::MAX);
        for backoff_strategy in [BackoffStrategy::Linear, BackoffStrategy::Exponential] {
            let policy = RetryPolicy {
                backoff_interval: interval,
                backoff_strategy,
                max_delay: interval,
                ..Default::default()
            };

            assert_eq!(policy.delay_for(u32::MAX), interval);
            assert!(matches!(
                policy.decide(25, &transport_error()),
                RetryDecision::Retry { delay } if delay == interval
            ));
        }
    }

    #[test]
    fn jitter_varies_delay() {
        let base_delay = Duration::from_secs(10);
        let mut seen_delays = std::collections::HashSet::new();

        for _ in 0..20 {
            seen_delays.insert(apply_jitter(base_delay, 0.5).as_millis());
        }

        assert!(seen_delays.len() > 1, "jitter should create variation");
        for &delay_ms in &seen_delays {
            assert!((5_000..=15_000).contains(&delay_ms), "delay out of range: {delay_ms}ms");
        }
    }
}
