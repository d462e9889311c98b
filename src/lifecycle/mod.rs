//! # Lifecycle engine.
//!
//! Drives managed objects through a fixed state machine by walking per-state
//! lists of conditions ("rotaries"). Everything here is synchronous; the async
//! monitor scheduler in [`crate::core`] only decides *when* to crank.
//!
//! ```text
//!   ClassConst (immutable, shared)          InstanceState (per object)
//!   ├─ base / derived conditions            ├─ state, prev, attrs
//!   ├─ rotaries per state          ◄─────── ├─ condition slots
//!   └─ superclass ─► ClassConst ...         └─ trace ring
//!
//!   set_cond ─► slot set ─► crank_object ─► handler ─► Done/Pending/Reschedule/Continue
//! ```
//!
//! ## Modules
//! - [`state`]: states and the legal transition table
//! - [`canary`]: integrity markers checked on every entry
//! - [`cond`]: identifiers, condition and rotary records, handler type
//! - [`class`]: class constants, inheritance and lookup
//! - [`instance`]: per-object mutable data
//! - [`ops`]: condition signaling, state access
//! - [`crank`]: the crank algorithm
//! - [`trace`]: per-object trace ring and sinks
//! - [`debug`]: process-wide lifecycle debug tracing per class

pub mod canary;
pub mod class;
pub mod cond;
pub mod crank;
pub mod debug;
pub mod instance;
pub mod ops;
pub mod state;
pub mod trace;

#[cfg(test)]
pub(crate) mod fixture;

pub use canary::Canary;
pub use class::{ClassConst, ClassConstBuilder};
pub use cond::{
    BaseCond, ClassId, CondAttrs, CondHandler, CondId, DerivedCond, LifecycleStatus, ObjectId,
    Rotary, RotaryAttrs, RotaryCond, StateTransitions, TIMER_STOPPED,
};
pub use debug::{clear_debug_trace, debug_trace_classes, debug_trace_enabled, set_debug_trace_class};
pub use instance::{InstanceAttrs, InstanceState, LifecycleObject};
pub use ops::clear_current_cond;
pub use state::LifecycleState;
pub use trace::{TraceEntry, TraceFlags, TraceRecord, TraceSink, TracingSink};
