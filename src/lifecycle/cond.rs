//! # Condition and rotary constants.
//!
//! A **condition** is a unit of work owned by a class: an id, a handler, attribute
//! flags and (for base conditions) a name plus a per-state transition table. A
//! **rotary** is the ordered list of conditions a class walks while in one state.
//!
//! ```text
//! CondId (u32)
//! ┌────────────────┬────────────────┐
//! │ class id (16)  │ local no. (16) │
//! └────────────────┴────────────────┘
//!
//! Rotary(Ready) = [ RotaryCond(P, PRESET), RotaryCond(A), RotaryCond(T) ]
//!                     │                      │              │
//!                     ▼                      ▼              ▼
//!                  BaseCond P            BaseCond A     BaseCond T (timer, 60s)
//!                                        Ready ─► Fail
//! ```
//!
//! ## Rules
//! - A base condition's id carries the id of the class that defines it.
//! - A derived condition reuses an ancestor's id and replaces only the handler
//!   (and, for timers, the interval).
//! - Rotary order is fixed at build time.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::LifecycleError;

use super::canary::Canary;
use super::instance::LifecycleObject;
use super::state::{LifecycleState, PERSISTENT_COUNT};

/// Class identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u16);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a managed object, assigned by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Condition identifier: owning class in the high 16 bits, class-local number in the low 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CondId(u32);

impl CondId {
    /// Builds the id of condition `local` owned by `class`.
    ///
    /// # Example
    /// ```
    /// use lifecrank::{ClassId, CondId};
    ///
    /// let id = CondId::new(ClassId(3), 2);
    /// assert_eq!(id.raw(), 0x0003_0002);
    /// assert_eq!(id.class(), ClassId(3));
    /// ```
    pub const fn new(class: ClassId, local: u16) -> Self {
        CondId(((class.0 as u32) << 16) | local as u32)
    }

    /// Owning class.
    pub const fn class(self) -> ClassId {
        ClassId((self.0 >> 16) as u16)
    }

    /// Class-local number.
    pub const fn local(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Packed value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CondId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Result of a condition handler and of a whole crank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    /// Work finished.
    Done,
    /// Waiting on something external; crank again when woken.
    Pending,
    /// Crank again no later than this many milliseconds (`0` = immediately).
    Reschedule(u32),
    /// Re-walk without waiting (handler side effects invalidated earlier work,
    /// or a state change is in flight).
    Continue,
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleStatus::Done => f.write_str("DONE"),
            LifecycleStatus::Pending => f.write_str("PENDING"),
            LifecycleStatus::Reschedule(ms) => write!(f, "RESCHEDULE({ms}ms)"),
            LifecycleStatus::Continue => f.write_str("CONTINUE"),
        }
    }
}

/// Condition, online and pending handler.
///
/// Handlers run with no engine lock held and may call back into the engine
/// (`set_cond`, `clear_current_cond`, ...). They must not block.
pub type CondHandler<O> =
    Arc<dyn Fn(&O, &mut <O as LifecycleObject>::Packet) -> LifecycleStatus + Send + Sync>;

/// Timer interval sentinel meaning "no timer".
pub const TIMER_STOPPED: u32 = u32::MAX;

/// Converts a timer interval in 1/100 s ticks to milliseconds.
pub(crate) fn ticks_to_ms(ticks: u32) -> u64 {
    u64::from(ticks) * 10
}

bitflags! {
    /// Condition attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CondAttrs: u32 {
        /// Never set explicitly; only runs when preset, to drive a state transition.
        const NO_SET = 0x1;
    }
}

bitflags! {
    /// Rotary-entry attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RotaryAttrs: u32 {
        /// Set the condition when the rotary's state is entered.
        const PRESET = 0x1;
        /// Let an explicit `set_cond` run a preset condition again in the same state.
        const REDO_PRESETS = 0x2;
        /// A missing handler counts as an immediate `Done`.
        const NULL_FUNC_OK = 0x4;
    }
}

/// Per-state transition targets of a base condition.
///
/// Identity by default: completing the condition in state `S` leaves the object in `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransitions([LifecycleState; PERSISTENT_COUNT]);

impl Default for StateTransitions {
    fn default() -> Self {
        StateTransitions(LifecycleState::PERSISTENT)
    }
}

impl StateTransitions {
    /// Target when the condition completes while the object is in `state`.
    pub fn target(&self, state: LifecycleState) -> LifecycleState {
        self.0[state.index()]
    }

    fn set(&mut self, from: LifecycleState, to: LifecycleState) {
        self.0[from.index()] = to;
    }

    /// Pairs `(from, to)` where the condition moves the object.
    pub fn changes(&self) -> impl Iterator<Item = (LifecycleState, LifecycleState)> + '_ {
        LifecycleState::PERSISTENT
            .iter()
            .zip(self.0.iter())
            .filter(|(from, to)| from != to)
            .map(|(from, to)| (*from, *to))
    }
}

/// Condition defined by a class.
pub struct BaseCond<O: LifecycleObject> {
    pub(crate) canary: Canary,
    pub(crate) name: &'static str,
    pub(crate) id: CondId,
    pub(crate) handler: Option<CondHandler<O>>,
    pub(crate) attrs: CondAttrs,
    pub(crate) transitions: StateTransitions,
    pub(crate) timer: Option<u32>,
}

impl<O: LifecycleObject> BaseCond<O> {
    /// New simple condition with no handler and identity transitions.
    pub fn new(name: &'static str, id: CondId) -> Self {
        Self {
            canary: Canary::BASE_COND,
            name,
            id,
            handler: None,
            attrs: CondAttrs::empty(),
            transitions: StateTransitions::default(),
            timer: None,
        }
    }

    /// Installs the handler.
    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&O, &mut O::Packet) -> LifecycleStatus + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }

    /// Marks the condition never-set.
    pub fn no_set(mut self) -> Self {
        self.attrs.insert(CondAttrs::NO_SET);
        self
    }

    /// Completing the condition in `from` moves the object to `to`.
    pub fn transition(mut self, from: LifecycleState, to: LifecycleState) -> Self {
        self.transitions.set(from, to);
        self
    }

    /// Turns this into a timer condition firing every `ticks` hundredths of a second.
    pub fn timer(mut self, ticks: u32) -> Self {
        self.canary = Canary::BASE_TIMER_COND;
        self.timer = Some(ticks);
        self
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Condition id.
    pub fn id(&self) -> CondId {
        self.id
    }

    /// Attributes.
    pub fn attrs(&self) -> CondAttrs {
        self.attrs
    }

    /// Transition table.
    pub fn transitions(&self) -> &StateTransitions {
        &self.transitions
    }

    /// Configured interval in ticks, for timer conditions.
    pub fn timer_interval(&self) -> Option<u32> {
        self.timer
    }

    pub(crate) fn check(&self) -> Result<(), LifecycleError> {
        if self.timer.is_some() {
            self.canary.check(Canary::BASE_TIMER_COND, "base timer cond")
        } else {
            self.canary.check(Canary::BASE_COND, "base cond")
        }
    }
}

/// Subclass override of an ancestor's condition.
pub struct DerivedCond<O: LifecycleObject> {
    pub(crate) canary: Canary,
    pub(crate) id: CondId,
    pub(crate) handler: Option<CondHandler<O>>,
    pub(crate) timer: Option<u32>,
}

impl<O: LifecycleObject> DerivedCond<O> {
    /// Overrides condition `id` (defined by an ancestor).
    pub fn new(id: CondId) -> Self {
        Self {
            canary: Canary::DERIVED_COND,
            id,
            handler: None,
            timer: None,
        }
    }

    /// Installs the replacement handler.
    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&O, &mut O::Packet) -> LifecycleStatus + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }

    /// Overrides the interval of an ancestor timer condition.
    pub fn timer(mut self, ticks: u32) -> Self {
        self.canary = Canary::DERIVED_TIMER_COND;
        self.timer = Some(ticks);
        self
    }

    /// Condition id.
    pub fn id(&self) -> CondId {
        self.id
    }

    pub(crate) fn check(&self) -> Result<(), LifecycleError> {
        if self.timer.is_some() {
            self.canary
                .check(Canary::DERIVED_TIMER_COND, "derived timer cond")
        } else {
            self.canary.check(Canary::DERIVED_COND, "derived cond")
        }
    }
}

/// One entry of a rotary.
#[derive(Debug, Clone, Copy)]
pub struct RotaryCond {
    pub(crate) canary: Canary,
    pub(crate) cond: CondId,
    pub(crate) attrs: RotaryAttrs,
}

impl RotaryCond {
    /// Plain entry.
    pub fn new(cond: CondId) -> Self {
        Self {
            canary: Canary::ROTARY_COND,
            cond,
            attrs: RotaryAttrs::empty(),
        }
    }

    /// Preset the condition on state entry.
    pub fn preset(mut self) -> Self {
        self.attrs.insert(RotaryAttrs::PRESET);
        self
    }

    /// Allow re-running the preset condition after an explicit set.
    pub fn redo_presets(mut self) -> Self {
        self.attrs.insert(RotaryAttrs::REDO_PRESETS);
        self
    }

    /// Treat a missing handler as `Done`.
    pub fn null_func_ok(mut self) -> Self {
        self.attrs.insert(RotaryAttrs::NULL_FUNC_OK);
        self
    }

    /// Condition referenced.
    pub fn cond(&self) -> CondId {
        self.cond
    }

    /// Entry attributes.
    pub fn attrs(&self) -> RotaryAttrs {
        self.attrs
    }

    pub(crate) fn check(&self) -> Result<(), LifecycleError> {
        self.canary.check(Canary::ROTARY_COND, "rotary cond")
    }
}

/// Ordered conditions walked while the object is in `state`.
#[derive(Debug, Clone)]
pub struct Rotary {
    pub(crate) canary: Canary,
    pub(crate) state: LifecycleState,
    pub(crate) entries: Vec<RotaryCond>,
}

impl Rotary {
    pub(crate) fn new(state: LifecycleState, entries: Vec<RotaryCond>) -> Self {
        Self {
            canary: Canary::ROTARY,
            state,
            entries,
        }
    }

    /// State this rotary applies to.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Entries in walk order.
    pub fn entries(&self) -> &[RotaryCond] {
        &self.entries
    }

    pub(crate) fn check(&self) -> Result<(), LifecycleError> {
        self.canary.check(Canary::ROTARY, "rotary")
    }
}
