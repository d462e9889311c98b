//! # Per-object lifecycle data.
//!
//! [`InstanceState`] is the mutable half of the engine: everything that changes
//! while an object lives. It is embedded in the owning object and reached through
//! [`LifecycleObject::lifecycle`].
//!
//! ```text
//! InstanceState
//! ├─ state lock ──► { state, prev, attrs, reschedule override, last crank }
//! ├─ cond lock  ──► { slots[0..n] (one per condition of the leaf class), current }
//! ├─ trace lock ──► TraceRing
//! └─ wakeup     ──► Notify (scheduler waits on it between cranks)
//! ```
//!
//! ## Rules
//! - The three locks are independent and never nested.
//! - The condition lock is held only around bookkeeping, never across a handler.
//! - `current` is set only while a handler runs.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::LifecycleConfig;
use crate::error::LifecycleError;

use super::canary::Canary;
use super::class::{ClassConst, SlotKind};
use super::cond::{ClassId, CondId, ObjectId, RotaryAttrs, TIMER_STOPPED, ticks_to_ms};
use super::state::LifecycleState;
use super::trace::{TraceEntry, TraceRing};

/// Implemented by every object the engine drives.
///
/// The engine never looks inside the object or its packet; it forwards both to
/// handlers.
pub trait LifecycleObject: Send + Sync + 'static {
    /// Per-crank context handed to handlers (the "scheduler packet").
    type Packet: Send + 'static;

    /// Stable identifier used in logs, traces and events.
    fn object_id(&self) -> ObjectId;

    /// The object's lifecycle data.
    fn lifecycle(&self) -> &InstanceState;
}

bitflags! {
    /// Instance attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstanceAttrs: u32 {
        /// A crank is in flight.
        const IN_CRANK = 0x1;
        /// A condition requested a transition; the pending state has not completed yet.
        const STATE_CHANGED = 0x2;
        /// The running handler asked for its condition to be cleared.
        const CLEAR_CURRENT_COND = 0x4;
        /// Destroy completed; the object takes no more cranks.
        const RETIRED = 0x8;
    }
}

/// Mutable state of one condition for one object.
#[derive(Debug, Clone)]
pub(crate) enum CondInstance {
    /// Pending work while `set_count != call_count` (or a preset is outstanding).
    Simple {
        set_count: u32,
        call_count: u32,
        preset: bool,
    },
    /// Due once `interval` ticks passed since `armed_at`, or when forced.
    Timer {
        interval: u32,
        armed_at: Instant,
        forced: bool,
    },
}

impl CondInstance {
    fn new(kind: SlotKind, now: Instant) -> Self {
        match kind {
            SlotKind::Simple => CondInstance::Simple {
                set_count: 0,
                call_count: 0,
                preset: false,
            },
            SlotKind::Timer(interval) => CondInstance::Timer {
                interval,
                armed_at: now,
                forced: false,
            },
        }
    }

    pub(crate) fn set(&mut self) {
        match self {
            CondInstance::Simple { set_count, .. } => *set_count = set_count.wrapping_add(1),
            CondInstance::Timer { forced, .. } => *forced = true,
        }
    }

    pub(crate) fn preset(&mut self) {
        match self {
            CondInstance::Simple { preset, .. } => *preset = true,
            CondInstance::Timer { forced, .. } => *forced = true,
        }
    }

    /// Returns the set-count snapshot to complete against if the condition is due.
    ///
    /// A preset entry without `REDO_PRESETS` only runs for its preset.
    pub(crate) fn due(&self, attrs: RotaryAttrs, now: Instant) -> Option<u32> {
        match *self {
            CondInstance::Simple {
                set_count,
                call_count,
                preset,
            } => {
                let one_shot = attrs.contains(RotaryAttrs::PRESET)
                    && !attrs.contains(RotaryAttrs::REDO_PRESETS);
                let due = preset || (!one_shot && set_count != call_count);
                due.then_some(set_count)
            }
            CondInstance::Timer {
                interval,
                armed_at,
                forced,
            } => {
                let elapsed = interval != TIMER_STOPPED
                    && now.saturating_duration_since(armed_at).as_millis()
                        >= u128::from(ticks_to_ms(interval));
                (forced || elapsed).then_some(0)
            }
        }
    }

    /// Marks the work observed at `snapshot` as done. Sets that raced with the
    /// handler stay pending.
    pub(crate) fn complete(&mut self, snapshot: u32, now: Instant) {
        match self {
            CondInstance::Simple {
                call_count, preset, ..
            } => {
                *call_count = snapshot;
                *preset = false;
            }
            CondInstance::Timer {
                armed_at, forced, ..
            } => {
                *armed_at = now;
                *forced = false;
            }
        }
    }

    pub(crate) fn force_clear(&mut self, now: Instant) {
        match self {
            CondInstance::Simple {
                set_count,
                call_count,
                preset,
            } => {
                *call_count = *set_count;
                *preset = false;
            }
            CondInstance::Timer {
                armed_at, forced, ..
            } => {
                *armed_at = now;
                *forced = false;
            }
        }
    }

    /// Restarts a timer's interval; a pending forced run is kept.
    pub(crate) fn rearm(&mut self, now: Instant) {
        if let CondInstance::Timer { armed_at, .. } = self {
            *armed_at = now;
        }
    }

    /// Milliseconds until a running timer is due; `None` for simple or stopped conditions.
    pub(crate) fn next_due_ms(&self, now: Instant) -> Option<u64> {
        match *self {
            CondInstance::Timer {
                interval,
                armed_at,
                forced,
            } if interval != TIMER_STOPPED || forced => {
                if forced {
                    return Some(0);
                }
                let elapsed = now.saturating_duration_since(armed_at).as_millis() as u64;
                Some(ticks_to_ms(interval).saturating_sub(elapsed))
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_set(&self) -> bool {
        match *self {
            CondInstance::Simple {
                set_count,
                call_count,
                preset,
            } => preset || set_count != call_count,
            CondInstance::Timer { forced, .. } => forced,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateData {
    pub(crate) state: LifecycleState,
    /// Persistent state most recently left.
    pub(crate) prev: LifecycleState,
    pub(crate) attrs: InstanceAttrs,
    /// Caller-requested upper bound for the next crank.
    pub(crate) reschedule_ms: Option<u32>,
    pub(crate) last_crank: Option<Instant>,
    pub(crate) cranks: u64,
}

#[derive(Debug)]
pub(crate) struct CondData {
    pub(crate) slots: Vec<CondInstance>,
    /// Condition whose handler is running.
    pub(crate) current: Option<CondId>,
}

/// Lifecycle data embedded in every managed object.
///
/// Created with the object, before it enters Specialize; torn down with it.
#[derive(Debug)]
pub struct InstanceState {
    pub(crate) canary: Canary,
    class: ClassId,
    hierarchy: Vec<ClassId>,
    config: LifecycleConfig,
    pub(crate) state: Mutex<StateData>,
    pub(crate) conds: Mutex<CondData>,
    pub(crate) trace: Mutex<TraceRing>,
    wakeup: Arc<Notify>,
}

impl InstanceState {
    /// Fresh instance for an object whose leaf class is `class`, default configuration.
    pub fn new<O: LifecycleObject>(class: &ClassConst<O>) -> Self {
        Self::with_config(class, LifecycleConfig::default())
    }

    /// Fresh instance with explicit engine configuration.
    pub fn with_config<O: LifecycleObject>(class: &ClassConst<O>, config: LifecycleConfig) -> Self {
        let now = Instant::now();
        let slots = class
            .layout()
            .iter()
            .map(|kind| CondInstance::new(*kind, now))
            .collect();

        Self {
            canary: Canary::INSTANCE,
            class: class.id(),
            hierarchy: class.hierarchy(),
            state: Mutex::new(StateData {
                state: LifecycleState::Specialize,
                prev: LifecycleState::Specialize,
                attrs: InstanceAttrs::empty(),
                reschedule_ms: None,
                last_crank: None,
                cranks: 0,
            }),
            conds: Mutex::new(CondData {
                slots,
                current: None,
            }),
            trace: Mutex::new(TraceRing::new(config.trace_capacity, config.trace_flags)),
            config,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Leaf class id.
    pub fn class_id(&self) -> ClassId {
        self.class
    }

    /// Class ids from the leaf to the root.
    pub fn hierarchy(&self) -> &[ClassId] {
        &self.hierarchy
    }

    /// Engine configuration.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Handle the scheduler waits on between cranks; notified by `set_cond` and `reschedule`.
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Current attribute bits.
    pub fn attrs(&self) -> InstanceAttrs {
        self.state.lock().attrs
    }

    /// True while a crank is in flight.
    pub fn is_in_crank(&self) -> bool {
        self.attrs().contains(InstanceAttrs::IN_CRANK)
    }

    /// True once the destroy rotary has completed.
    pub fn is_retired(&self) -> bool {
        self.attrs().contains(InstanceAttrs::RETIRED)
    }

    /// Number of cranks completed (successful or not).
    pub fn crank_count(&self) -> u64 {
        self.state.lock().cranks
    }

    pub(crate) fn check(&self) -> Result<(), LifecycleError> {
        self.canary.check(Canary::INSTANCE, "instance")
    }

    pub(crate) fn record(&self, entry: TraceEntry) {
        self.trace.lock().push(entry);
    }

    pub(crate) fn notify(&self) {
        self.wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_simple_level_triggered() {
        let now = Instant::now();
        let mut c = CondInstance::new(SlotKind::Simple, now);
        assert_eq!(c.due(RotaryAttrs::empty(), now), None);

        c.set();
        c.set();
        c.set();
        let snap = c.due(RotaryAttrs::empty(), now).unwrap();
        c.complete(snap, now);
        assert_eq!(c.due(RotaryAttrs::empty(), now), None);
        assert!(!c.is_set());
    }

    #[test]
    fn test_set_during_run_survives_completion() {
        let now = Instant::now();
        let mut c = CondInstance::new(SlotKind::Simple, now);
        c.set();
        let snap = c.due(RotaryAttrs::empty(), now).unwrap();
        c.set(); // raced with the handler
        c.complete(snap, now);
        assert!(c.due(RotaryAttrs::empty(), now).is_some());
    }

    #[test]
    fn test_one_shot_preset_ignores_sets() {
        let now = Instant::now();
        let preset = RotaryAttrs::PRESET;
        let redo = RotaryAttrs::PRESET | RotaryAttrs::REDO_PRESETS;
        let mut c = CondInstance::new(SlotKind::Simple, now);

        c.set();
        assert_eq!(c.due(preset, now), None);
        assert!(c.due(redo, now).is_some());

        c.preset();
        let snap = c.due(preset, now).unwrap();
        c.complete(snap, now);
        assert_eq!(c.due(preset, now), None);
    }

    #[test]
    fn test_timer_due_after_interval() {
        let start = Instant::now();
        let mut c = CondInstance::new(SlotKind::Timer(10), start);
        assert_eq!(c.due(RotaryAttrs::empty(), start + Duration::from_millis(99)), None);
        assert_eq!(c.next_due_ms(start + Duration::from_millis(40)), Some(60));

        let at = start + Duration::from_millis(100);
        assert!(c.due(RotaryAttrs::empty(), at).is_some());
        c.complete(0, at);
        assert_eq!(c.due(RotaryAttrs::empty(), at + Duration::from_millis(50)), None);
    }

    #[test]
    fn test_stopped_timer_only_runs_when_forced() {
        let start = Instant::now();
        let mut c = CondInstance::new(SlotKind::Timer(TIMER_STOPPED), start);
        let later = start + Duration::from_secs(3600);
        assert_eq!(c.due(RotaryAttrs::empty(), later), None);
        assert_eq!(c.next_due_ms(later), None);

        c.set();
        assert!(c.due(RotaryAttrs::empty(), later).is_some());
        assert_eq!(c.next_due_ms(later), Some(0));
    }
}
