//! # Integrity canaries.
//!
//! Every constant record and every instance carries a typed magic number. Entry
//! points compare it against the expected value for the record type **before**
//! reading any other field, and fail with [`LifecycleError::Corrupted`] on mismatch.
//!
//! ## Rules
//! - The check is O(1) and runs on every call, in every build profile.
//! - A failed check stops the call; no further field of that record is read.
//! - Canaries are only written by constructors, so safe code can not produce a
//!   mismatch; the guard exists for records shared with foreign memory and for
//!   catching logic that hands the wrong record to an entry point.

use crate::error::LifecycleError;

/// Typed magic number stamped into lifecycle records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canary(u32);

impl Canary {
    /// [`ClassConst`](crate::ClassConst).
    pub const CLASS_CONST: Canary = Canary(0x4C43_4C53);
    /// Base (simple) condition definition.
    pub const BASE_COND: Canary = Canary(0x4C43_4243);
    /// Base timer condition definition.
    pub const BASE_TIMER_COND: Canary = Canary(0x4C43_4254);
    /// Derived (override) condition.
    pub const DERIVED_COND: Canary = Canary(0x4C43_4443);
    /// Derived timer condition.
    pub const DERIVED_TIMER_COND: Canary = Canary(0x4C43_4454);
    /// Per-state rotary.
    pub const ROTARY: Canary = Canary(0x4C43_524F);
    /// Rotary entry.
    pub const ROTARY_COND: Canary = Canary(0x4C43_5243);
    /// [`InstanceState`](crate::InstanceState).
    pub const INSTANCE: Canary = Canary(0x4C43_494E);

    /// Raw value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Fails with [`LifecycleError::Corrupted`] unless `self == expected`.
    #[inline]
    pub(crate) fn check(self, expected: Canary, what: &'static str) -> Result<(), LifecycleError> {
        if self == expected {
            Ok(())
        } else {
            Err(LifecycleError::Corrupted {
                what,
                expected: expected.0,
                found: self.0,
            })
        }
    }

    #[cfg(test)]
    pub(crate) fn poisoned() -> Canary {
        Canary(0xDEAD_BEEF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canaries_are_distinct() {
        let all = [
            Canary::CLASS_CONST,
            Canary::BASE_COND,
            Canary::BASE_TIMER_COND,
            Canary::DERIVED_COND,
            Canary::DERIVED_TIMER_COND,
            Canary::ROTARY,
            Canary::ROTARY_COND,
            Canary::INSTANCE,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_check_reports_what_and_values() {
        let err = Canary::poisoned()
            .check(Canary::ROTARY, "rotary")
            .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::Corrupted {
                what: "rotary",
                expected: Canary::ROTARY.value(),
                found: 0xDEAD_BEEF,
            }
        );
        assert!(Canary::ROTARY.check(Canary::ROTARY, "rotary").is_ok());
    }
}
