//! Retry delay series for reconnect and reattach.

use std::time::Duration;

/// How successive retry delays grow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Delays follow 1, 1, 2, 3, 5, 8, … times the base delay.
    #[default]
    Fibonacci,
    /// Delays follow 1, 2, 4, 8, … times the base delay.
    Exponential,
}

/// Recovery policy for a connection or link.
///
/// # Invariants
/// - `base_delay` must not exceed `max_delay`; [`RetryPolicy::normalized`]
///   enforces this before the series is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per series.
    pub retries: u32,
    /// Delay growth curve.
    pub strategy: RetryStrategy,
    /// Regenerate the series once exhausted instead of giving up.
    pub forever: bool,
    /// Delay multiplied by the series values.
    pub base_delay: Duration,
    /// Cap applied to every delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            strategy: RetryStrategy::Fibonacci,
            forever: false,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Clamp delays to sane bounds and ensure `base_delay <= max_delay`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.base_delay = self.base_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.base_delay > self.max_delay {
            std::mem::swap(&mut self.base_delay, &mut self.max_delay);
        }
        self
    }
}

/// A stateful walk over a policy's delay series.
///
/// The series resets on success and regenerates after exhaustion only
/// when the policy says `forever`.
#[derive(Clone, Debug)]
pub struct RetrySeries {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetrySeries {
    /// Start a series for `policy`.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            attempt: 0,
        }
    }

    /// The delay before the next attempt, or `None` once the series is
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.retries {
            if !self.policy.forever {
                return None;
            }
            self.attempt = 0;
        }
        let factor = match self.policy.strategy {
            RetryStrategy::Fibonacci => fibonacci(self.attempt),
            RetryStrategy::Exponential => 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX),
        };
        self.attempt += 1;
        Some(
            self.policy
                .base_delay
                .saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX))
                .min(self.policy.max_delay),
        )
    }

    /// Reset after a successful attempt.
    pub fn reset(&mut self) { self.attempt = 0; }

    /// Attempts taken in the current series.
    #[must_use]
    pub const fn attempts(&self) -> u32 { self.attempt }
}

/// The `n`th value of 1, 1, 2, 3, 5, 8, …
fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn fibonacci_series_follows_the_sequence() {
        let policy = RetryPolicy {
            retries: 6,
            strategy: RetryStrategy::Fibonacci,
            forever: false,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
        };
        let mut series = RetrySeries::new(policy);
        let delays: Vec<u64> = std::iter::from_fn(|| series.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10, 10, 20, 30, 50, 80]);
    }

    #[test]
    fn exponential_series_doubles() {
        let policy = RetryPolicy {
            retries: 5,
            strategy: RetryStrategy::Exponential,
            forever: false,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };
        let mut series = RetrySeries::new(policy);
        let delays: Vec<u64> = std::iter::from_fn(|| series.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy {
            retries: 10,
            strategy: RetryStrategy::Exponential,
            forever: false,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        };
        let mut series = RetrySeries::new(policy);
        let last = std::iter::from_fn(|| series.next_delay()).last();
        assert_eq!(last, Some(Duration::from_secs(4)));
    }

    #[rstest]
    #[case(false, None)]
    #[case(true, Some(Duration::from_millis(5)))]
    fn exhaustion_respects_forever(#[case] forever: bool, #[case] expected: Option<Duration>) {
        let policy = RetryPolicy {
            retries: 2,
            strategy: RetryStrategy::Fibonacci,
            forever,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1),
        };
        let mut series = RetrySeries::new(policy);
        assert!(series.next_delay().is_some());
        assert!(series.next_delay().is_some());
        // The third pull exhausts the series unless it regenerates.
        assert_eq!(series.next_delay(), expected);
    }

    #[test]
    fn reset_restarts_the_series() {
        let mut series = RetrySeries::new(RetryPolicy::default());
        let first = series.next_delay();
        series.next_delay();
        series.next_delay();
        series.reset();
        assert_eq!(series.next_delay(), first);
    }

    #[test]
    fn inverted_delays_are_normalised() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        }
        .normalized();
        assert!(policy.base_delay <= policy.max_delay);
    }
}
