//! Delay policies for failed cranks.
//!
//! When a crank returns a non-fatal error the monitor actor waits before
//! cranking the object again. These types decide how long.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the delay evolves over consecutive failures (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so objects failing together do not retry in lockstep
//!
//! ## Quick wiring
//! ```text
//! SchedulerConfig { backoff: BackoffPolicy, .. }
//!      └─► core::actor::MonitorActor:
//!           - failures += 1 on Err from crank, reset on Ok
//!           - backoff.delay_after(failures) before the next crank
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=100ms, factor=2.0, max=30s, jitter=None.
//! - `JitterPolicy::None`; `Equal` keeps at least half of the computed delay.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
