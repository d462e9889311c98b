//! # Condition signaling and state access.
//!
//! The surface class monitors and collaborators use between cranks:
//!
//! ```text
//! set_cond ──────────────► slot.set()        ─► trace COND_SET    ─► wake scheduler
//! force_clear_cond ──────► slot.force_clear() ─► trace COND_CLEAR
//! clear_current_cond ────► CLEAR_CURRENT_COND (honored when the running handler returns)
//! set_interval_timer_cond► timer interval := ticks, re-armed  ─► wake scheduler
//! stop_timer ────────────► timer interval := TIMER_STOPPED
//! do_all_cond_presets ───► preset every PRESET entry of a state's rotaries
//! reschedule ────────────► crank again within msec ─► wake scheduler
//! get_state / set_state ─► state lock (set_state checks the transition table)
//! ```
//!
//! ## Rules
//! - Every call checks the class and instance canaries first.
//! - The class passed may be any class of the object's hierarchy; conditions are
//!   looked up from that class upward.
//! - `set_cond` is level-triggered: several sets before a crank need one run.
//! - Entering a persistent state restarts the timers its rotaries walk.

use tokio::time::Instant;

use crate::error::LifecycleError;

use super::class::ClassConst;
use super::debug::debug_trace_enabled;
use super::cond::{CondAttrs, CondId, RotaryAttrs, TIMER_STOPPED};
use super::instance::{CondInstance, InstanceAttrs, InstanceState, LifecycleObject};
use super::state::LifecycleState;
use super::trace::TraceEntry;

impl<O: LifecycleObject> ClassConst<O> {
    /// Signals pending work on `cond`.
    ///
    /// Simple conditions get their set count bumped; timer conditions are forced due.
    /// Fails for never-set conditions.
    pub fn set_cond(&self, object: &O, cond: CondId) -> Result<(), LifecycleError> {
        self.guarded(object, |inst| {
            let base = self.base_cond(cond)?;
            if base.attrs().contains(CondAttrs::NO_SET) {
                return Err(LifecycleError::NoSetCondition { cond });
            }
            self.with_slot(inst, cond, CondInstance::set)?;
            inst.record(TraceEntry::CondSet { cond });
            inst.notify();
            Ok(())
        })
    }

    /// Clears `cond` whether or not its handler ran. Recovery and debug paths only.
    pub fn force_clear_cond(&self, object: &O, cond: CondId) -> Result<(), LifecycleError> {
        self.guarded(object, |inst| {
            self.base_cond(cond)?;
            let now = Instant::now();
            self.with_slot(inst, cond, |slot| slot.force_clear(now))?;
            inst.record(TraceEntry::CondClear { cond });
            Ok(())
        })
    }

    /// Sets a timer condition's interval (1/100 s ticks) and restarts its countdown.
    ///
    /// [`TIMER_STOPPED`] disables the timer.
    pub fn set_interval_timer_cond(
        &self,
        object: &O,
        cond: CondId,
        ticks: u32,
    ) -> Result<(), LifecycleError> {
        self.guarded(object, |inst| {
            self.base_cond(cond)?;
            let now = Instant::now();
            self.with_slot(inst, cond, |slot| match slot {
                CondInstance::Timer {
                    interval, armed_at, ..
                } => {
                    *interval = ticks;
                    *armed_at = now;
                    Ok(())
                }
                CondInstance::Simple { .. } => Err(LifecycleError::NotTimerCondition { cond }),
            })??;
            inst.notify();
            Ok(())
        })
    }

    /// Cancels a timer condition, including a pending forced run.
    pub fn stop_timer(&self, object: &O, cond: CondId) -> Result<(), LifecycleError> {
        self.guarded(object, |inst| {
            self.base_cond(cond)?;
            self.with_slot(inst, cond, |slot| match slot {
                CondInstance::Timer {
                    interval, forced, ..
                } => {
                    *interval = TIMER_STOPPED;
                    *forced = false;
                    Ok(())
                }
                CondInstance::Simple { .. } => Err(LifecycleError::NotTimerCondition { cond }),
            })?
        })
    }

    /// Presets every `PRESET` entry of `state`'s rotaries, from this class to the root.
    ///
    /// Returns the number of conditions preset. Used when forcing an object
    /// directly into a state, and by the crank when a pending state completes.
    pub fn do_all_cond_presets(
        &self,
        object: &O,
        state: LifecycleState,
    ) -> Result<usize, LifecycleError> {
        self.guarded(object, |inst| self.preset_pass(inst, state.persistent()))
    }

    /// Asks for the next crank within `msec` milliseconds.
    ///
    /// The earliest request wins until a crank consumes it.
    pub fn reschedule(&self, object: &O, msec: u32) -> Result<(), LifecycleError> {
        self.guarded(object, |inst| {
            {
                let mut st = inst.state.lock();
                st.reschedule_ms = Some(st.reschedule_ms.map_or(msec, |prev| prev.min(msec)));
            }
            inst.notify();
            Ok(())
        })
    }

    /// Current state.
    pub fn get_state(&self, object: &O) -> Result<LifecycleState, LifecycleError> {
        self.guarded(object, |inst| Ok(inst.state.lock().state))
    }

    /// Forces the object into `target`.
    ///
    /// Allowed when the transition table permits it from the current state (a
    /// pending state may also be completed directly). Forcing a persistent state
    /// runs its preset pass; forcing a pending state leaves completion to the next
    /// crank. Setting the current state again is a no-op.
    pub fn set_state(&self, object: &O, target: LifecycleState) -> Result<(), LifecycleError> {
        self.guarded(object, |inst| {
            let old = {
                let mut st = inst.state.lock();
                if st.attrs.contains(InstanceAttrs::RETIRED) {
                    return Err(LifecycleError::Destroyed {
                        object: object.object_id(),
                    });
                }
                let current = st.state;
                if current == target {
                    return Ok(());
                }
                let legal = (current.is_pending() && target == current.persistent())
                    || current.can_transition_to(target);
                if !legal {
                    return Err(LifecycleError::IllegalTransition {
                        from: current,
                        to: target,
                    });
                }

                if !current.is_pending() {
                    st.prev = current;
                }
                st.state = target;
                if target.is_pending() {
                    st.attrs.insert(InstanceAttrs::STATE_CHANGED);
                } else {
                    st.attrs.remove(InstanceAttrs::STATE_CHANGED);
                }
                current
            };

            if !target.is_pending() {
                self.rearm_timers(inst, target)?;
                self.preset_pass(inst, target)?;
            }
            inst.record(TraceEntry::ForcedStateChange { old, new: target });
            if debug_trace_enabled(inst.hierarchy()) {
                tracing::info!(
                    target: "lifecrank::debug",
                    object = %object.object_id(),
                    class = %self.id(),
                    old = %old,
                    new = %target,
                    "state forced"
                );
            }
            tracing::debug!(
                object = %object.object_id(),
                class = %self.id(),
                old = %old,
                new = %target,
                "state forced"
            );
            inst.notify();
            Ok(())
        })
    }

    pub(crate) fn preset_pass(
        &self,
        inst: &InstanceState,
        state: LifecycleState,
    ) -> Result<usize, LifecycleError> {
        let mut count = 0;
        for class in self.chain() {
            class.check()?;
            let Some(rotary) = class.rotary(state) else {
                continue;
            };
            rotary.check()?;
            for entry in rotary.entries() {
                entry.check()?;
                if !entry.attrs().contains(RotaryAttrs::PRESET) {
                    continue;
                }
                self.with_slot(inst, entry.cond(), CondInstance::preset)?;
                inst.record(TraceEntry::CondPreset { cond: entry.cond() });
                count += 1;
            }
        }
        Ok(count)
    }

    /// Restarts every timer walked in `state`, so time spent elsewhere does not count.
    pub(crate) fn rearm_timers(
        &self,
        inst: &InstanceState,
        state: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let now = Instant::now();
        for class in self.chain() {
            let Some(rotary) = class.rotary(state) else {
                continue;
            };
            for entry in rotary.entries() {
                self.with_slot(inst, entry.cond(), |slot| slot.rearm(now))?;
            }
        }
        Ok(())
    }

    /// Runs `f` on the slot of `cond` under the condition lock.
    pub(crate) fn with_slot<T>(
        &self,
        inst: &InstanceState,
        cond: CondId,
        f: impl FnOnce(&mut CondInstance) -> T,
    ) -> Result<T, LifecycleError> {
        let index = self.slot(cond)?;
        let mut conds = inst.conds.lock();
        let slot = conds
            .slots
            .get_mut(index)
            .ok_or(LifecycleError::CondNotFound {
                class: self.id(),
                cond,
            })?;
        Ok(f(slot))
    }

    /// Enters the object, runs `op`, and logs a failure with context.
    pub(crate) fn guarded<'a, T>(
        &self,
        object: &'a O,
        op: impl FnOnce(&'a InstanceState) -> Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        let res = self.enter(object).and_then(op);
        if let Err(err) = &res {
            self.report(object, known_state(object.lifecycle()), err);
        }
        res
    }
}

/// Marks the running handler's condition as satisfied.
///
/// Only valid from inside a condition handler. Lets a handler that returns
/// `Pending` (waiting on completion of work it started) still clear itself.
pub fn clear_current_cond<O: LifecycleObject>(object: &O) -> Result<(), LifecycleError> {
    let inst = object.lifecycle();
    inst.check()?;
    if inst.conds.lock().current.is_none() {
        return Err(LifecycleError::NotInCondition {
            object: object.object_id(),
        });
    }
    inst.state
        .lock()
        .attrs
        .insert(InstanceAttrs::CLEAR_CURRENT_COND);
    Ok(())
}

/// State for log context, unless the instance itself is corrupted.
pub(crate) fn known_state(inst: &InstanceState) -> Option<LifecycleState> {
    inst.check().ok().map(|_| inst.state.lock().state)
}
