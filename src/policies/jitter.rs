//! # Jitter policy for crank retry delays.
//!
//! [`JitterPolicy`] randomizes a computed backoff delay. Objects of one class
//! tend to fail together (a shared backend goes away); without jitter their
//! monitors would all retry in the same tick.
//!
//! - [`JitterPolicy::None`]: the delay as computed
//! - [`JitterPolicy::Full`]: uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2` plus uniform in `[0, delay/2]`
//! - [`JitterPolicy::Decorrelated`]: uniform in `[floor, min(3 × delay, max)]`

use std::time::Duration;

use rand::Rng;

/// Randomization applied to retry delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// Exact delays. Deterministic, which tests rely on.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
    /// Uniform in `[floor, min(3 × delay, max)]`.
    ///
    /// Spreads retries widest while never going below the first delay.
    Decorrelated,
}

impl JitterPolicy {
    /// Randomizes `delay`.
    ///
    /// `floor` and `max` bound the decorrelated range and are ignored by the
    /// other variants. The result never exceeds `max` when `delay <= max`.
    pub fn apply(self, delay: Duration, floor: Duration, max: Duration) -> Duration {
        let ms = millis(delay);
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(uniform(0, ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + uniform(0, ms - half))
            }
            JitterPolicy::Decorrelated => {
                let lo = millis(floor);
                let hi = ms.saturating_mul(3).min(millis(max)).max(lo);
                Duration::from_millis(uniform(lo, hi))
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

fn uniform(lo: u64, hi: u64) -> u64 {
    if lo >= hi {
        return lo;
    }
    rand::rng().random_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d, FLOOR, MAX), d);
    }

    #[test]
    fn test_zero_delay_stays_zero() {
        for j in [JitterPolicy::Full, JitterPolicy::Equal] {
            assert_eq!(j.apply(Duration::ZERO, FLOOR, MAX), Duration::ZERO);
        }
    }

    #[test]
    fn test_equal_keeps_half() {
        let d = Duration::from_millis(1001);
        for _ in 0..200 {
            let got = JitterPolicy::Equal.apply(d, FLOOR, MAX);
            assert!(got >= Duration::from_millis(500) && got <= d, "{got:?}");
        }
    }

    #[test]
    fn test_decorrelated_bounds() {
        let d = Duration::from_secs(20);
        for _ in 0..200 {
            let got = JitterPolicy::Decorrelated.apply(d, FLOOR, MAX);
            assert!(got >= FLOOR && got <= MAX, "{got:?}");
        }
    }
}
