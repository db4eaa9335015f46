// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Backoff strategies for session reconnects.
//!
//! Only the session reconnect loop retries; requests are never retried.

use std::time::Duration;

use rand::Rng;

// =============================================================================
// RetryStrategy
// =============================================================================

/// Strategy for calculating the delay before a reconnect attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Fixed delay between attempts.
    Fixed(Duration),
    /// Exponential backoff with optional jitter.
    Exponential(ExponentialBackoff),
}

impl RetryStrategy {
    /// Calculates the delay for the given attempt number (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(duration) => *duration,
            Self::Exponential(exp) => exp.delay(attempt),
        }
    }

    /// Creates a fixed delay strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed(delay)
    }

    /// Creates an exponential backoff strategy with jitter.
    pub fn exponential_with_jitter(
        initial_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Self {
        Self::Exponential(
            ExponentialBackoff::new(initial_delay, max_delay).with_jitter(jitter_factor),
        )
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

// =============================================================================
// ExponentialBackoff
// =============================================================================

/// Exponential backoff: `initial_delay * multiplier^attempt`, capped at
/// `max_delay`, with an optional symmetric jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter factor (0.0 = none, 1.0 = up to 100%).
    pub jitter_factor: f64,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff without jitter.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Calculates the delay for the given attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter_factor > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter_factor;
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Attempt counter driving one reconnect cycle.
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: RetryStrategy,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Creates a counter. `max_attempts == 0` means unlimited.
    pub fn new(strategy: RetryStrategy, max_attempts: u32) -> Self {
        Self {
            strategy,
            max_attempts,
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt, or `None` when exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.strategy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Number of attempts handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_without_jitter() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(0.5);
        for _ in 0..100 {
            let delay = backoff.delay(0);
            assert!(delay >= Duration::from_millis(49));
            assert!(delay <= Duration::from_millis(151));
        }
    }

    #[test]
    fn test_backoff_exhausts() {
        let mut backoff = Backoff::new(RetryStrategy::fixed(Duration::from_millis(5)), 3);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_backoff_unlimited() {
        let mut backoff = Backoff::new(RetryStrategy::fixed(Duration::ZERO), 0);
        for _ in 0..1000 {
            assert!(backoff.next_delay().is_some());
        }
    }
}
