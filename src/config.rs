//! # Engine and scheduler configuration.
//!
//! Two structs, one per layer:
//! - [`LifecycleConfig`] per-instance engine knobs (trace ring, reschedule cap,
//!   rotary restart bound). Handed to [`InstanceState::with_config`](crate::InstanceState::with_config).
//! - [`SchedulerConfig`] monitor scheduler knobs (grace, concurrency, bus,
//!   idle polling, crank-failure backoff).
//!
//! ## Sentinel values
//! - `max_concurrent = 0` → unlimited (no semaphore created)
//! - `trace_capacity = 0` → tracing disabled for the instance
//! - `max_reschedule_ms = 0` → no cap on handler-requested reschedules
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use lifecrank::{SchedulerConfig, LifecycleConfig, TraceFlags};
//!
//! let mut cfg = SchedulerConfig::default();
//! cfg.grace = Duration::from_secs(10);
//! cfg.max_concurrent = 4;
//! assert_eq!(cfg.concurrency_limit(), Some(4));
//!
//! let mut engine = LifecycleConfig::default();
//! engine.trace_flags = TraceFlags::STATE_CHANGE;
//! assert_eq!(engine.trace_capacity, 64);
//! ```

use std::time::Duration;

use crate::lifecycle::TraceFlags;
use crate::policies::BackoffPolicy;

/// Per-instance engine configuration.
///
/// ## Field semantics
/// - `trace_capacity`: entries kept in the trace ring (`0` = no tracing)
/// - `trace_flags`: entry kinds recorded
/// - `max_reschedule_ms`: upper bound applied to `Reschedule(ms)` returned by handlers (`0` = no cap)
/// - `max_rotary_restarts`: how many `Continue` restarts one crank may do before
///   handing control back with `Reschedule(0)`
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// Capacity of the per-object trace ring.
    pub trace_capacity: usize,
    /// Trace entry kinds recorded.
    pub trace_flags: TraceFlags,
    /// Cap for handler-requested reschedule intervals.
    pub max_reschedule_ms: u32,
    /// Bound on rotary restarts within one crank.
    pub max_rotary_restarts: u32,
}

impl LifecycleConfig {
    /// Clamps a handler-requested interval to `max_reschedule_ms`.
    #[inline]
    pub fn clamp_reschedule(&self, ms: u32) -> u32 {
        if self.max_reschedule_ms == 0 {
            ms
        } else {
            ms.min(self.max_reschedule_ms)
        }
    }
}

impl Default for LifecycleConfig {
    /// Default configuration:
    ///
    /// - `trace_capacity = 64`
    /// - `trace_flags = TraceFlags::ALL`
    /// - `max_reschedule_ms = 60_000` (one minute)
    /// - `max_rotary_restarts = 16`
    fn default() -> Self {
        Self {
            trace_capacity: 64,
            trace_flags: TraceFlags::ALL,
            max_reschedule_ms: 60_000,
            max_rotary_restarts: 16,
        }
    }
}

/// Monitor scheduler configuration.
///
/// ## Field semantics
/// - `grace`: Maximum wait for monitors to stop on shutdown (`0s` = no wait)
/// - `max_concurrent`: Cranks running at the same time (`0` = unlimited)
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `pending_poll`: Re-crank interval for `Pending`/`Done` results when nothing wakes the object
/// - `backoff`: Delay policy after a failed crank
/// - `fence_on_fatal`: Stop cranking an object after a fatal engine error
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum time to wait for graceful shutdown before giving up.
    pub grace: Duration,

    /// Maximum number of cranks in flight across all objects.
    ///
    /// - `0` = unlimited (no semaphore)
    /// - `n > 0` = at most `n` objects crank simultaneously
    pub max_concurrent: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Idle re-crank interval for `Pending` and `Done` outcomes.
    ///
    /// Mirrors the monitor scheduler's default timer: a pending object is looked at
    /// again after this long even if nobody signals it.
    pub pending_poll: Duration,

    /// Backoff applied between failed cranks of one object.
    pub backoff: BackoffPolicy,

    /// Fence (stop cranking) objects whose crank fails with a fatal error.
    pub fence_on_fatal: bool,
}

impl SchedulerConfig {
    /// Returns the global concurrency limit as an `Option`.
    ///
    /// - `None` → unlimited (no semaphore)
    /// - `Some(n)` → at most `n` concurrent cranks
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        if self.max_concurrent == 0 {
            None
        } else {
            Some(self.max_concurrent)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SchedulerConfig {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `max_concurrent = 0` (unlimited)
    /// - `bus_capacity = 1024`
    /// - `pending_poll = 3s`
    /// - `backoff = BackoffPolicy::default()`
    /// - `fence_on_fatal = true`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            max_concurrent: 0,
            bus_capacity: 1024,
            pending_poll: Duration::from_millis(3000),
            backoff: BackoffPolicy::default(),
            fence_on_fatal: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_reschedule() {
        let mut cfg = LifecycleConfig::default();
        assert_eq!(cfg.clamp_reschedule(120_000), 60_000);
        assert_eq!(cfg.clamp_reschedule(10), 10);
        cfg.max_reschedule_ms = 0;
        assert_eq!(cfg.clamp_reschedule(120_000), 120_000);
    }

    #[test]
    fn test_sentinels() {
        let mut cfg = SchedulerConfig::default();
        assert_eq!(cfg.concurrency_limit(), None);
        cfg.bus_capacity = 0;
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
