//! # Backoff policy for worker launch retries.
//!
//! [`BackoffPolicy`] controls how long the supervisor waits between failed
//! attempts to launch a worker. The delay for attempt `n` (0-indexed) is
//! `first × factor^n`, clamped to `max`. The base delay is derived from the
//! attempt number alone, so a clamped value never feeds back into later ones.
//!
//! ```rust
//! use std::time::Duration;
//! use drover_pool::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Exponential retry backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `max = 5s`, `factor = 2.0`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
        }
    }

    #[test]
    fn test_exponential_growth() {
        let backoff = policy(100, 30_000, 2.0);
        assert_eq!(backoff.next(0), Duration::from_millis(100));
        assert_eq!(backoff.next(1), Duration::from_millis(200));
        assert_eq!(backoff.next(2), Duration::from_millis(400));
        assert_eq!(backoff.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_constant_factor() {
        let backoff = policy(500, 30_000, 1.0);
        for attempt in 0..10 {
            assert_eq!(backoff.next(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn test_first_exceeds_max() {
        let backoff = policy(10_000, 5_000, 2.0);
        assert_eq!(backoff.next(0), Duration::from_millis(5_000));
    }

    #[test]
    fn test_overflow_clamps_to_max() {
        let backoff = policy(100, 10_000, 2.0);
        assert_eq!(backoff.next(100), Duration::from_millis(10_000));
        assert_eq!(backoff.next(u32::MAX), Duration::from_millis(10_000));
    }
}
