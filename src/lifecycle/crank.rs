//! # The crank.
//!
//! One crank runs an object forward as far as it can go right now:
//!
//! ```text
//! crank_object(leaf, object, packet)
//!   ├─ check canaries, claim IN_CRANK (else AlreadyCranking)
//!   ├─ pending state?  pending callback ─► Pending/Reschedule: stop
//!   │                  preset pass(dest) ─► state := dest ─► trace STATE_CHANGE
//!   ├─ walk: for class in leaf..=root, for entry in class.rotary(state):
//!   │     due?  no ─► next entry
//!   │     run handler (cond lock released)
//!   │       Done      ─► clear; transition requested? ─► state := Pending(target), return Continue
//!   │       Pending   ─► keep set, return Pending
//!   │       Reschedule─► keep set, return Reschedule(ms)
//!   │       Continue  ─► clear; transition or restart the walk
//!   └─ walk exhausted:
//!         Ready   ─► online callback
//!         Destroy ─► retire, return Done
//!         else    ─► Reschedule(min(class interval, requested, next timer))
//! ```
//!
//! ## Rules
//! - At most one crank per object; a concurrent call fails fast.
//! - No lock is held while a handler runs; handlers may call back into the engine.
//! - A condition set while its handler runs stays pending after the handler completes.
//! - `IN_CRANK` is released on every exit path, including handler panics.

use tokio::time::Instant;

use crate::error::LifecycleError;

use super::class::ClassConst;
use super::debug::debug_trace_enabled;
use super::cond::{CondAttrs, CondId, LifecycleStatus, RotaryAttrs, RotaryCond};
use super::instance::{InstanceAttrs, InstanceState, LifecycleObject};
use super::ops::known_state;
use super::state::LifecycleState;
use super::trace::TraceEntry;

/// What the walk does after one rotary entry.
enum Step {
    Next,
    Restart,
    Stop(LifecycleStatus),
}

/// Holds `IN_CRANK` for the duration of one crank.
struct CrankGuard<'a> {
    inst: &'a InstanceState,
}

impl<'a> CrankGuard<'a> {
    /// Claims the object, returning the state at crank start and the time since
    /// the previous crank.
    fn claim<O: LifecycleObject>(
        inst: &'a InstanceState,
        object: &O,
    ) -> Result<(Self, LifecycleState, u64), LifecycleError> {
        let mut st = inst.state.lock();
        if st.attrs.contains(InstanceAttrs::RETIRED) {
            return Err(LifecycleError::Destroyed {
                object: object.object_id(),
            });
        }
        if st.attrs.contains(InstanceAttrs::IN_CRANK) {
            return Err(LifecycleError::AlreadyCranking {
                object: object.object_id(),
            });
        }
        st.attrs.insert(InstanceAttrs::IN_CRANK);
        let since = st
            .last_crank
            .map_or(0, |at| Instant::now().saturating_duration_since(at).as_millis() as u64);
        Ok((Self { inst }, st.state, since))
    }
}

impl Drop for CrankGuard<'_> {
    fn drop(&mut self) {
        self.inst.conds.lock().current = None;
        let mut st = self.inst.state.lock();
        st.attrs.remove(InstanceAttrs::IN_CRANK);
        st.attrs.remove(InstanceAttrs::CLEAR_CURRENT_COND);
        st.last_crank = Some(Instant::now());
        st.cranks += 1;
    }
}

impl<O: LifecycleObject> ClassConst<O> {
    /// Runs one crank of `object`. Must be called with the object's leaf class.
    ///
    /// Returns how the scheduler should proceed: `Done` (nothing left, or retired),
    /// `Pending` (waiting on outside completion), `Reschedule(ms)` (crank again
    /// within `ms`) or `Continue` (crank again immediately).
    ///
    /// Errors are logged before they are returned.
    pub fn crank_object(
        &self,
        object: &O,
        packet: &mut O::Packet,
    ) -> Result<LifecycleStatus, LifecycleError> {
        let claimed = self
            .enter_leaf(object)
            .and_then(|inst| CrankGuard::claim(inst, object));
        let (guard, state, since_last_ms) = match claimed {
            Ok(claimed) => claimed,
            Err(err) => {
                self.report(object, known_state(object.lifecycle()), &err);
                return Err(err);
            }
        };
        let inst = guard.inst;

        inst.record(TraceEntry::CrankBegin {
            state,
            since_last_ms,
        });
        tracing::trace!(object = %object.object_id(), state = %state, "crank begin");

        let res = self.crank_inner(object, inst, packet, state);

        let end = inst.state.lock().state;
        inst.record(TraceEntry::CrankEnd {
            state: end,
            status: res.as_ref().ok().copied(),
        });
        match &res {
            Ok(status) => {
                tracing::trace!(object = %object.object_id(), state = %end, status = %status, "crank end")
            }
            Err(err) => self.report(object, Some(end), err),
        }
        drop(guard);
        res
    }

    fn crank_inner(
        &self,
        object: &O,
        inst: &InstanceState,
        packet: &mut O::Packet,
        state: LifecycleState,
    ) -> Result<LifecycleStatus, LifecycleError> {
        if state.is_pending() {
            if let Some(status) = self.complete_pending(object, inst, packet, state)? {
                return Ok(status);
            }
        }
        let state = inst.state.lock().state;
        self.walk(object, inst, packet, state)
    }

    /// Finishes a requested transition. Returns a status when the pending
    /// callback holds the object in the pending state.
    fn complete_pending(
        &self,
        object: &O,
        inst: &InstanceState,
        packet: &mut O::Packet,
        pending: LifecycleState,
    ) -> Result<Option<LifecycleStatus>, LifecycleError> {
        if let Some(callback) = self.resolve_pending() {
            match callback(object, packet) {
                LifecycleStatus::Pending => return Ok(Some(LifecycleStatus::Pending)),
                LifecycleStatus::Reschedule(ms) => {
                    return Ok(Some(self.rescheduled(inst, ms)));
                }
                LifecycleStatus::Done | LifecycleStatus::Continue => {}
            }
        }

        let target = pending.persistent();
        self.rearm_timers(inst, target)?;
        self.preset_pass(inst, target)?;
        let old = {
            let mut st = inst.state.lock();
            st.state = target;
            st.attrs.remove(InstanceAttrs::STATE_CHANGED);
            st.prev
        };
        inst.record(TraceEntry::StateChange { old, new: target });
        if debug_trace_enabled(inst.hierarchy()) {
            tracing::info!(
                target: "lifecrank::debug",
                object = %object.object_id(),
                class = %self.id(),
                old = %old,
                new = %target,
                "state changed"
            );
        }
        tracing::debug!(
            object = %object.object_id(),
            class = %self.id(),
            old = %old,
            new = %target,
            "state changed"
        );
        Ok(None)
    }

    fn walk(
        &self,
        object: &O,
        inst: &InstanceState,
        packet: &mut O::Packet,
        state: LifecycleState,
    ) -> Result<LifecycleStatus, LifecycleError> {
        let mut restarts = 0u32;
        'walk: loop {
            for class in self.chain() {
                class.check()?;
                let Some(rotary) = class.rotary(state) else {
                    continue;
                };
                rotary.check()?;
                for entry in rotary.entries() {
                    entry.check()?;
                    match self.run_entry(object, inst, packet, state, entry)? {
                        Step::Next => {}
                        Step::Stop(status) => return Ok(status),
                        Step::Restart => {
                            restarts += 1;
                            if restarts > inst.config().max_rotary_restarts {
                                tracing::warn!(
                                    object = %object.object_id(),
                                    state = %state,
                                    restarts,
                                    "rotary keeps restarting, yielding"
                                );
                                inst.record(TraceEntry::Reschedule { msec: 0 });
                                return Ok(LifecycleStatus::Reschedule(0));
                            }
                            continue 'walk;
                        }
                    }
                }
            }
            break;
        }
        self.idle(object, inst, packet, state)
    }

    fn run_entry(
        &self,
        object: &O,
        inst: &InstanceState,
        packet: &mut O::Packet,
        state: LifecycleState,
        entry: &RotaryCond,
    ) -> Result<Step, LifecycleError> {
        let cond = entry.cond();
        let base = self.base_cond(cond)?;
        if base.attrs().contains(CondAttrs::NO_SET) && !entry.attrs().contains(RotaryAttrs::PRESET)
        {
            return Ok(Step::Next);
        }

        let Some(snapshot) = self.with_slot(inst, cond, |slot| slot.due(entry.attrs(), Instant::now()))?
        else {
            return Ok(Step::Next);
        };

        let handler = self.resolve_cond_func(cond)?;
        if handler.is_none() && !entry.attrs().contains(RotaryAttrs::NULL_FUNC_OK) {
            return Err(LifecycleError::NullCondFunc { cond });
        }

        inst.conds.lock().current = Some(cond);
        inst.record(TraceEntry::CondRunBefore { cond });
        let status = match handler {
            Some(handler) => handler(object, packet),
            None => LifecycleStatus::Done,
        };
        inst.record(TraceEntry::CondRunAfter { cond, status });
        if debug_trace_enabled(inst.hierarchy()) {
            tracing::info!(
                target: "lifecrank::debug",
                object = %object.object_id(),
                class = %self.id(),
                state = %state,
                cond = %cond,
                status = %status,
                "condition ran"
            );
        }

        let (clear_requested, now_state) = {
            let mut st = inst.state.lock();
            let requested = st.attrs.contains(InstanceAttrs::CLEAR_CURRENT_COND);
            st.attrs.remove(InstanceAttrs::CLEAR_CURRENT_COND);
            (requested, st.state)
        };
        let completed = matches!(status, LifecycleStatus::Done | LifecycleStatus::Continue)
            || clear_requested;
        {
            let mut conds = inst.conds.lock();
            conds.current = None;
        }
        if completed {
            self.with_slot(inst, cond, |slot| slot.complete(snapshot, Instant::now()))?;
        }

        // The handler forced a state change; the old rotary no longer applies.
        if now_state != state {
            return Ok(Step::Stop(LifecycleStatus::Continue));
        }

        Ok(match status {
            LifecycleStatus::Pending => Step::Stop(LifecycleStatus::Pending),
            LifecycleStatus::Reschedule(ms) => Step::Stop(self.rescheduled(inst, ms)),
            LifecycleStatus::Done | LifecycleStatus::Continue => {
                let target = base.transitions().target(state);
                if target != state {
                    self.request_transition(object, inst, cond, state, target);
                    Step::Stop(LifecycleStatus::Continue)
                } else if status == LifecycleStatus::Continue {
                    Step::Restart
                } else {
                    Step::Next
                }
            }
        })
    }

    fn request_transition(
        &self,
        object: &O,
        inst: &InstanceState,
        cond: CondId,
        from: LifecycleState,
        to: LifecycleState,
    ) {
        let pending = to.pending().unwrap_or(to);
        {
            let mut st = inst.state.lock();
            st.prev = from;
            st.state = pending;
            st.attrs.insert(InstanceAttrs::STATE_CHANGED);
        }
        inst.record(TraceEntry::CondStateChange { cond, from, to });
        if debug_trace_enabled(inst.hierarchy()) {
            tracing::info!(
                target: "lifecrank::debug",
                object = %object.object_id(),
                class = %self.id(),
                cond = %cond,
                from = %from,
                to = %to,
                "condition requested transition"
            );
        }
        tracing::debug!(
            object = %object.object_id(),
            class = %self.id(),
            cond = %cond,
            from = %from,
            to = %to,
            "condition requested transition"
        );
    }

    /// Nothing in the rotaries was due.
    fn idle(
        &self,
        object: &O,
        inst: &InstanceState,
        packet: &mut O::Packet,
        state: LifecycleState,
    ) -> Result<LifecycleStatus, LifecycleError> {
        match state {
            LifecycleState::Ready => {
                if let Some(online) = self.resolve_online() {
                    match online(object, packet) {
                        LifecycleStatus::Done => {}
                        LifecycleStatus::Reschedule(ms) => return Ok(self.rescheduled(inst, ms)),
                        other => return Ok(other),
                    }
                }
            }
            LifecycleState::Destroy => {
                inst.state.lock().attrs.insert(InstanceAttrs::RETIRED);
                tracing::debug!(object = %object.object_id(), class = %self.id(), "object retired");
                return Ok(LifecycleStatus::Done);
            }
            _ => {}
        }

        let mut msec = self.reschedule_interval(state);
        if let Some(requested) = inst.state.lock().reschedule_ms.take() {
            msec = msec.min(requested);
        }
        if let Some(timer) = self.next_timer_ms(inst, state)? {
            msec = msec.min(u32::try_from(timer).unwrap_or(u32::MAX));
        }
        inst.record(TraceEntry::Reschedule { msec });
        Ok(LifecycleStatus::Reschedule(msec))
    }

    /// Milliseconds until the earliest running timer walked in `state` is due.
    fn next_timer_ms(
        &self,
        inst: &InstanceState,
        state: LifecycleState,
    ) -> Result<Option<u64>, LifecycleError> {
        let mut slots = Vec::new();
        for class in self.chain() {
            if let Some(rotary) = class.rotary(state) {
                for entry in rotary.entries() {
                    slots.push(self.slot(entry.cond())?);
                }
            }
        }
        let now = Instant::now();
        let conds = inst.conds.lock();
        Ok(slots
            .into_iter()
            .filter_map(|i| conds.slots.get(i).and_then(|c| c.next_due_ms(now)))
            .min())
    }

    fn rescheduled(&self, inst: &InstanceState, ms: u32) -> LifecycleStatus {
        let msec = inst.config().clamp_reschedule(ms);
        inst.record(TraceEntry::Reschedule { msec });
        LifecycleStatus::Reschedule(msec)
    }
}
