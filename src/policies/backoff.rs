//! # Backoff between failed cranks.
//!
//! [`BackoffPolicy`] turns the number of consecutive crank failures of one
//! object into a wait before the next crank:
//!
//! ```text
//! failures:   1       2        3        4   ...
//! delay:    first  first×f  first×f²  first×f³  (clamped to max, then jittered)
//! ```
//!
//! The base is derived from the failure count alone; jitter output is never
//! fed back, so randomized delays cannot drift downward over time.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use lifecrank::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay_after(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay_after(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay_after(20), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry delay policy for failing objects.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound on the computed delay.
    pub max: Duration,
    /// Growth per additional failure (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// A fixed delay regardless of the failure count.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay to wait after `failures` consecutive failed cranks.
    ///
    /// `failures` is 1-based; `0` is treated as `1`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base, self.first.min(self.max), self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(factor: f64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor,
            jitter,
        }
    }

    #[test]
    fn test_grows_per_failure() {
        let p = policy(2.0, JitterPolicy::None);
        let got: Vec<u128> = (1..=5).map(|n| p.delay_after(n).as_millis()).collect();
        assert_eq!(got, vec![100, 200, 400, 800, 1600]);
        assert_eq!(p.delay_after(0), p.delay_after(1));
    }

    #[test]
    fn test_constant() {
        let p = BackoffPolicy::constant(Duration::from_millis(250));
        for n in 1..20 {
            assert_eq!(p.delay_after(n), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_clamps_to_max() {
        let p = policy(2.0, JitterPolicy::None);
        assert_eq!(p.delay_after(40), Duration::from_secs(30));
        assert_eq!(p.delay_after(u32::MAX), Duration::from_secs(30));

        let inverted = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            ..p
        };
        assert_eq!(inverted.delay_after(1), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_below_base() {
        let p = policy(2.0, JitterPolicy::Full);
        for n in 1..15 {
            let base = (100u64 << (n - 1)).min(30_000);
            assert!(p.delay_after(n) <= Duration::from_millis(base));
        }
    }

    #[test]
    fn test_decorrelated_never_below_first() {
        let p = policy(2.0, JitterPolicy::Decorrelated);
        for _ in 0..100 {
            let d = p.delay_after(9);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_secs(30));
        }
    }
}
