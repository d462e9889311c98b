//! # lifecrank
//!
//! **lifecrank** is a condition-driven lifecycle engine for managed objects
//! (drives, enclosures, links, anything with a life of its own), plus a tokio
//! scheduler that cranks them.
//!
//! Each object class declares *conditions* (named events with handlers) and,
//! per lifecycle state, an ordered *rotary* of the conditions that matter in
//! that state. Anyone may signal a condition; a *crank* walks the rotary of the
//! object's current state and runs the handlers whose conditions are set. A
//! handler can complete, defer, ask for a reschedule, or move the object to
//! another state.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   set_cond / timers / set_state                ClassConst (leaf ─► ... ─► root)
//!             │                                   ├─ conditions + handlers
//!             ▼                                   └─ rotary per state
//!   ┌──────────────────────┐    crank_object()          │
//!   │ InstanceState        │ ◄──────────────────────────┘
//!   │ state / slots / ring │
//!   └──────────┬───────────┘
//!              │ wakeup (Notify)
//!              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Scheduler                                                        │
//! │  - Registry: one MonitorActor per object                          │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to StateTracker, LogWriter, custom)    │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   MonitorActor       MonitorActor       MonitorActor
//!   crank → wait       crank → wait       crank → wait
//!        │ StateChanged, CrankFailed, ObjectFenced, ObjectDestroyed
//!        ▼
//!   Bus ──► subscriber listener ──► SubscriberSet ──► per-subscriber workers
//! ```
//!
//! ### One crank
//! ```text
//! crank_object(obj)
//!   ├─► claim IN_CRANK (AlreadyCranking if taken)
//!   ├─► pending state? ─► pending callback ─► preset pass ─► persistent state
//!   ├─► walk rotaries, leaf class first:
//!   │     entry due (set or timer expired)?
//!   │       └─► handler ─► Done       : clear, next entry
//!   │                   ─► Continue   : clear, restart walk
//!   │                   ─► Pending    : keep set, stop
//!   │                   ─► Reschedule : keep set, stop
//!   │       transition for this state? ─► pending target, stop with Continue
//!   └─► nothing due ─► Ready: online callback; Destroy: retire;
//!                     else Reschedule(min(interval, override, next timer))
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                   |
//! |-------------------|--------------------------------------------------------------|------------------------------------------------------|
//! | **Classes**       | Conditions, rotaries, inheritance, callbacks, verification.  | [`ClassConst`], [`BaseCond`], [`DerivedCond`]        |
//! | **Instances**     | Per-object state, condition slots, trace ring.               | [`InstanceState`], [`LifecycleObject`]               |
//! | **Engine**        | Crank, condition signaling, forced state changes.            | [`ClassConst::crank_object`], [`LifecycleStatus`]    |
//! | **Scheduler**     | Async cranking, runtime add/remove, graceful shutdown.       | [`Scheduler`], [`Monitor`], [`ClassMonitor`]         |
//! | **Subscriber API**| Hook into scheduler events.                                  | [`Subscribe`], [`StateTracker`]                      |
//! | **Policies**      | Delay between failed cranks.                                 | [`BackoffPolicy`], [`JitterPolicy`]                  |
//! | **Errors**        | Typed engine and scheduler errors.                           | [`LifecycleError`], [`SchedulerError`]               |
//! | **Configuration** | Engine and scheduler knobs.                                  | [`LifecycleConfig`], [`SchedulerConfig`]             |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (events to `tracing`).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use lifecrank::{
//!     BaseCond, ClassConst, ClassId, ClassMonitor, CondId, InstanceState, LifecycleObject,
//!     LifecycleState, LifecycleStatus, ObjectId, RotaryCond, Scheduler, SchedulerConfig,
//! };
//!
//! struct Drive { id: ObjectId, lc: InstanceState }
//!
//! impl LifecycleObject for Drive {
//!     type Packet = ();
//!     fn object_id(&self) -> ObjectId { self.id }
//!     fn lifecycle(&self) -> &InstanceState { &self.lc }
//! }
//!
//! const DRIVE: ClassId = ClassId(1);
//! const SPIN_UP: CondId = CondId::new(DRIVE, 1);
//! const REMOVED: CondId = CondId::new(DRIVE, 2);
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let class = ClassConst::<Drive>::builder(DRIVE, "drive")
//!         .base_cond(
//!             BaseCond::<Drive>::new("spin_up", SPIN_UP)
//!                 .transition(LifecycleState::Specialize, LifecycleState::Ready)
//!                 .handler(|_, _| LifecycleStatus::Done),
//!         )
//!         .base_cond(
//!             BaseCond::<Drive>::new("removed", REMOVED)
//!                 .transition(LifecycleState::Ready, LifecycleState::Destroy)
//!                 .handler(|_, _| LifecycleStatus::Done),
//!         )
//!         .rotary(LifecycleState::Specialize, [RotaryCond::new(SPIN_UP)])
//!         .rotary(LifecycleState::Ready, [RotaryCond::new(REMOVED)])
//!         .build()?;
//!
//!     let drive = Arc::new(Drive { id: ObjectId(1), lc: InstanceState::new(&class) });
//!     class.set_cond(&drive, SPIN_UP)?;
//!     class.set_cond(&drive, REMOVED)?;
//!
//!     // Specialize ─► Ready ─► Destroy, then the scheduler returns.
//!     let scheduler = Scheduler::builder(SchedulerConfig::default()).build();
//!     scheduler
//!         .run(vec![ClassMonitor::with_default_packet(class.clone(), drive.clone())])
//!         .await?;
//!     assert_eq!(class.get_state(&drive)?, LifecycleState::Destroy);
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
pub mod lifecycle;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use config::{LifecycleConfig, SchedulerConfig};
pub use core::{ClassMonitor, Monitor, MonitorRef, Scheduler, SchedulerBuilder};
pub use error::{LifecycleError, SchedulerError};
pub use events::{Bus, Event, EventKind};
pub use lifecycle::{
    BaseCond, Canary, ClassConst, ClassConstBuilder, ClassId, CondAttrs, CondHandler, CondId,
    DerivedCond, InstanceAttrs, InstanceState, LifecycleObject, LifecycleState, LifecycleStatus,
    ObjectId, Rotary, RotaryAttrs, RotaryCond, StateTransitions, TIMER_STOPPED, TraceEntry,
    TraceFlags, TraceRecord, TraceSink, TracingSink, clear_current_cond, clear_debug_trace,
    debug_trace_classes, debug_trace_enabled, set_debug_trace_class,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{StateTracker, Subscribe, SubscriberSet};

// Optional: built-in subscriber that forwards events to `tracing`.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
