//! # Class constants and the condition registry.
//!
//! A [`ClassConst`] is the immutable per-class table: its conditions, its
//! rotaries, its callbacks and a link to the superclass. Classes form a
//! single-inheritance chain; lookups walk it from the class they start at toward
//! the root.
//!
//! ```text
//!   Arc<ClassConst leaf> ──superclass──► Arc<ClassConst mid> ──► Arc<ClassConst root> ──► None
//!        │                                     │                        │
//!        ├ derived: A' (handler override)      ├ base: B                ├ base: A
//!        ├ rotary(Ready) [P, A]                └ rotary(Ready) [B]      └ rotary(Activate) [A]
//!        └ slots: A=0, B=1, P=2   (ancestors first)
//!
//! resolve_cond_func(leaf, A) ─► A' (leaf derived)
//! get_super_cond_func(leaf, A) ─► A  (root base)
//! ```
//!
//! ## Rules
//! - The chain is acyclic by construction: a superclass must be built first.
//! - A class contributes only new conditions and rotaries; inherited ones are
//!   found by walking the chain.
//! - Condition-instance slots are laid out ancestors first, so a slot index
//!   computed through any class of the chain is the same.
//! - Override by id: the first class (from the starting point upward) that
//!   derives or defines a condition supplies its handler.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::LifecycleError;

use super::canary::Canary;
use super::cond::{BaseCond, ClassId, CondHandler, CondId, DerivedCond, LifecycleStatus, Rotary, RotaryCond};
use super::instance::{InstanceState, LifecycleObject};
use super::state::{LifecycleState, PERSISTENT_COUNT};

/// Kind of per-object condition slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Simple,
    /// Timer with its configured interval in ticks.
    Timer(u32),
}

/// Immutable per-class lifecycle table.
///
/// Built once with [`ClassConst::builder`], shared as `Arc`, and checked with
/// [`ClassConst::verify`] at load time.
pub struct ClassConst<O: LifecycleObject> {
    pub(crate) canary: Canary,
    id: ClassId,
    name: &'static str,
    superclass: Option<Arc<ClassConst<O>>>,
    pub(crate) base_conds: Vec<BaseCond<O>>,
    pub(crate) derived_conds: Vec<DerivedCond<O>>,
    pub(crate) rotaries: Vec<Rotary>,
    online: Option<CondHandler<O>>,
    pending: Option<CondHandler<O>>,
    reschedule: [Option<u32>; PERSISTENT_COUNT],
    slots: HashMap<CondId, usize>,
    layout: Vec<SlotKind>,
}

impl<O: LifecycleObject> fmt::Debug for ClassConst<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassConst")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|s| s.id))
            .field("base_conds", &self.base_conds.len())
            .field("derived_conds", &self.derived_conds.len())
            .field("rotaries", &self.rotaries.len())
            .finish()
    }
}

impl<O: LifecycleObject> ClassConst<O> {
    /// Starts building a class.
    pub fn builder(id: ClassId, name: &'static str) -> ClassConstBuilder<O> {
        ClassConstBuilder {
            id,
            name,
            superclass: None,
            base_conds: Vec::new(),
            derived_conds: Vec::new(),
            rotaries: Vec::new(),
            online: None,
            pending: None,
            reschedule: [None; PERSISTENT_COUNT],
        }
    }

    /// Class id.
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Superclass, `None` at the root.
    pub fn superclass(&self) -> Option<&Arc<ClassConst<O>>> {
        self.superclass.as_ref()
    }

    /// This class's own rotary for `state` (inherited rotaries are not included).
    pub fn rotary(&self, state: LifecycleState) -> Option<&Rotary> {
        self.rotaries.iter().find(|r| r.state == state.persistent())
    }

    /// Class ids from this class to the root.
    #[doc(alias = "class_const_hierarchy")]
    pub fn hierarchy(&self) -> Vec<ClassId> {
        self.chain().map(|c| c.id).collect()
    }

    /// Canary-checks every record of this class and its ancestors.
    ///
    /// Stops at the first bad record. Intended for load time.
    #[doc(alias = "class_const_verify")]
    pub fn verify(&self) -> Result<(), LifecycleError> {
        let res = self.chain().try_for_each(|class| class.verify_own());
        match &res {
            Ok(()) => tracing::debug!(class = %self.id, name = self.name, "class constants verified"),
            Err(e) => tracing::error!(class = %self.id, name = self.name, error = %e, "class constant verification failed"),
        }
        res
    }

    fn verify_own(&self) -> Result<(), LifecycleError> {
        self.check()?;
        for rotary in &self.rotaries {
            rotary.check()?;
            for entry in &rotary.entries {
                entry.check()?;
            }
        }
        for cond in &self.base_conds {
            cond.check()?;
        }
        for cond in &self.derived_conds {
            cond.check()?;
        }
        Ok(())
    }

    /// Base definition of `cond`, searched from this class upward.
    pub fn base_cond(&self, cond: CondId) -> Result<&BaseCond<O>, LifecycleError> {
        for class in self.chain() {
            class.check()?;
            if let Some(base) = class.base_conds.iter().find(|b| b.id == cond) {
                base.check()?;
                return Ok(base);
            }
        }
        Err(LifecycleError::CondNotFound {
            class: self.id,
            cond,
        })
    }

    /// Handler of `cond` as seen from this class.
    ///
    /// Walks from this class to the root; the first class that derives or defines
    /// `cond` wins. `Ok(None)` means the winning definition has no handler.
    pub fn resolve_cond_func(&self, cond: CondId) -> Result<Option<&CondHandler<O>>, LifecycleError> {
        for class in self.chain() {
            class.check()?;
            if let Some(derived) = class.derived_conds.iter().find(|d| d.id == cond) {
                derived.check()?;
                return Ok(derived.handler.as_ref());
            }
            if let Some(base) = class.base_conds.iter().find(|b| b.id == cond) {
                base.check()?;
                return Ok(base.handler.as_ref());
            }
        }
        Err(LifecycleError::CondNotFound {
            class: self.id,
            cond,
        })
    }

    /// Handler of `cond` as seen from this class's superclass.
    ///
    /// Lets a derived handler chain to the implementation it overrides. Fails with
    /// [`LifecycleError::CondNotFound`] at the root.
    pub fn get_super_cond_func(
        &self,
        object: &O,
        cond: CondId,
    ) -> Result<Option<&CondHandler<O>>, LifecycleError> {
        self.enter(object)?;
        match &self.superclass {
            Some(superclass) => superclass.resolve_cond_func(cond),
            None => Err(LifecycleError::CondNotFound {
                class: self.id,
                cond,
            }),
        }
    }

    /// Runs the superclass's handler for `cond`, or reports `Done` when it has none.
    ///
    /// Convenience for derived handlers that extend their parent's behavior.
    pub fn call_super_cond(
        &self,
        object: &O,
        packet: &mut O::Packet,
        cond: CondId,
    ) -> Result<LifecycleStatus, LifecycleError> {
        Ok(match self.get_super_cond_func(object, cond)? {
            Some(handler) => handler(object, packet),
            None => LifecycleStatus::Done,
        })
    }

    /// Crank interval for `state` when nothing else asks for sooner.
    pub fn reschedule_interval(&self, state: LifecycleState) -> u32 {
        self.chain()
            .find_map(|c| c.reschedule[state.index()])
            .unwrap_or_else(|| state.default_reschedule_ms())
    }

    pub(crate) fn resolve_online(&self) -> Option<&CondHandler<O>> {
        self.chain().find_map(|c| c.online.as_ref())
    }

    pub(crate) fn resolve_pending(&self) -> Option<&CondHandler<O>> {
        self.chain().find_map(|c| c.pending.as_ref())
    }

    /// This class followed by its ancestors.
    pub(crate) fn chain(&self) -> impl Iterator<Item = &ClassConst<O>> {
        std::iter::successors(Some(self), |c| c.superclass.as_deref())
    }

    pub(crate) fn check(&self) -> Result<(), LifecycleError> {
        self.canary.check(Canary::CLASS_CONST, "class const")
    }

    pub(crate) fn layout(&self) -> &[SlotKind] {
        &self.layout
    }

    pub(crate) fn slot(&self, cond: CondId) -> Result<usize, LifecycleError> {
        self.slots
            .get(&cond)
            .copied()
            .ok_or(LifecycleError::CondNotFound {
                class: self.id,
                cond,
            })
    }

    /// Validates the class and the object's instance, returning the instance.
    pub(crate) fn enter<'a>(&self, object: &'a O) -> Result<&'a InstanceState, LifecycleError> {
        self.check()?;
        let inst = object.lifecycle();
        inst.check()?;
        if !inst.hierarchy().contains(&self.id) {
            return Err(LifecycleError::ClassNotInHierarchy {
                class: self.id,
                object: object.object_id(),
            });
        }
        Ok(inst)
    }

    /// Like [`Self::enter`] but requires this to be the object's leaf class.
    pub(crate) fn enter_leaf<'a>(&self, object: &'a O) -> Result<&'a InstanceState, LifecycleError> {
        self.check()?;
        let inst = object.lifecycle();
        inst.check()?;
        if inst.class_id() != self.id {
            return Err(LifecycleError::ClassMismatch {
                class: self.id,
                leaf: inst.class_id(),
                object: object.object_id(),
            });
        }
        Ok(inst)
    }

    /// Logs an engine failure with everything needed to diagnose it offline.
    pub(crate) fn report(&self, object: &O, state: Option<LifecycleState>, err: &LifecycleError) {
        let cond = match err {
            LifecycleError::CondNotFound { cond, .. }
            | LifecycleError::NullCondFunc { cond }
            | LifecycleError::NoSetCondition { cond }
            | LifecycleError::NotTimerCondition { cond } => Some(*cond),
            _ => None,
        };
        match err {
            LifecycleError::Corrupted { .. }
            | LifecycleError::CondNotFound { .. }
            | LifecycleError::NullCondFunc { .. }
            | LifecycleError::ClassMismatch { .. }
            | LifecycleError::ClassNotInHierarchy { .. } => tracing::error!(
                object = %object.object_id(),
                class = %self.id,
                cond = ?cond,
                state = ?state,
                error = %err,
                label = err.as_label(),
                "lifecycle failure"
            ),
            _ => tracing::warn!(
                object = %object.object_id(),
                class = %self.id,
                state = ?state,
                error = %err,
                label = err.as_label(),
                "lifecycle call rejected"
            ),
        }
    }
}

/// Builder for [`ClassConst`].
///
/// # Example
/// ```
/// use lifecrank::{
///     BaseCond, ClassConst, ClassId, CondId, InstanceState, LifecycleObject,
///     LifecycleState, LifecycleStatus, ObjectId, RotaryCond,
/// };
///
/// struct Port { id: ObjectId, lc: InstanceState }
/// impl LifecycleObject for Port {
///     type Packet = ();
///     fn object_id(&self) -> ObjectId { self.id }
///     fn lifecycle(&self) -> &InstanceState { &self.lc }
/// }
///
/// const PORT: ClassId = ClassId(10);
/// const LINK_DOWN: CondId = CondId::new(PORT, 1);
///
/// let class = ClassConst::<Port>::builder(PORT, "port")
///     .base_cond(
///         BaseCond::new("link_down", LINK_DOWN)
///             .transition(LifecycleState::Ready, LifecycleState::Offline)
///             .handler(|_port, _pkt| LifecycleStatus::Done),
///     )
///     .rotary(LifecycleState::Ready, [RotaryCond::new(LINK_DOWN)])
///     .build()
///     .unwrap();
///
/// class.verify().unwrap();
/// assert_eq!(class.hierarchy(), vec![PORT]);
/// ```
pub struct ClassConstBuilder<O: LifecycleObject> {
    id: ClassId,
    name: &'static str,
    superclass: Option<Arc<ClassConst<O>>>,
    base_conds: Vec<BaseCond<O>>,
    derived_conds: Vec<DerivedCond<O>>,
    rotaries: Vec<Rotary>,
    online: Option<CondHandler<O>>,
    pending: Option<CondHandler<O>>,
    reschedule: [Option<u32>; PERSISTENT_COUNT],
}

impl<O: LifecycleObject> ClassConstBuilder<O> {
    /// Sets the superclass.
    pub fn superclass(mut self, superclass: Arc<ClassConst<O>>) -> Self {
        self.superclass = Some(superclass);
        self
    }

    /// Adds a condition owned by this class.
    pub fn base_cond(mut self, cond: BaseCond<O>) -> Self {
        self.base_conds.push(cond);
        self
    }

    /// Overrides an ancestor's condition.
    pub fn derived_cond(mut self, cond: DerivedCond<O>) -> Self {
        self.derived_conds.push(cond);
        self
    }

    /// Declares the rotary walked in `state`.
    pub fn rotary(
        mut self,
        state: LifecycleState,
        entries: impl IntoIterator<Item = RotaryCond>,
    ) -> Self {
        self.rotaries
            .push(Rotary::new(state, entries.into_iter().collect()));
        self
    }

    /// Callback run when a Ready object's rotary has nothing to do.
    pub fn online<F>(mut self, f: F) -> Self
    where
        F: Fn(&O, &mut O::Packet) -> LifecycleStatus + Send + Sync + 'static,
    {
        self.online = Some(Arc::new(f));
        self
    }

    /// Callback run before a pending state is completed.
    ///
    /// Returning `Pending` or `Reschedule` keeps the object in the pending state.
    pub fn pending<F>(mut self, f: F) -> Self
    where
        F: Fn(&O, &mut O::Packet) -> LifecycleStatus + Send + Sync + 'static,
    {
        self.pending = Some(Arc::new(f));
        self
    }

    /// Overrides the idle crank interval for `state`.
    pub fn reschedule(mut self, state: LifecycleState, msec: u32) -> Self {
        self.reschedule[state.index()] = Some(msec);
        self
    }

    /// Validates the tables and lays out condition slots.
    pub fn build(self) -> Result<Arc<ClassConst<O>>, LifecycleError> {
        let id = self.id;
        let fail = |reason: String| LifecycleError::Build { class: id, reason };

        if let Some(superclass) = &self.superclass {
            superclass.check()?;
            if superclass.chain().any(|c| c.id == id) {
                return Err(fail(format!("class id {id} already used by an ancestor")));
            }
        }

        let mut seen = HashSet::new();
        for base in &self.base_conds {
            if base.id.class() != id {
                return Err(fail(format!("condition {} carries class {}", base.id, base.id.class())));
            }
            let inherited = self
                .superclass
                .as_ref()
                .is_some_and(|s| s.base_cond(base.id).is_ok());
            if !seen.insert(base.id) || inherited {
                return Err(fail(format!("condition {} defined twice", base.id)));
            }
            for (from, to) in base.transitions.changes() {
                if to.pending().is_none() || !from.can_transition_to(to) {
                    return Err(fail(format!(
                        "condition {} transitions {from} -> {to}",
                        base.name
                    )));
                }
            }
        }

        let mut derived_seen = HashSet::new();
        for derived in &self.derived_conds {
            let base = self
                .superclass
                .as_ref()
                .and_then(|s| s.base_cond(derived.id).ok())
                .ok_or_else(|| fail(format!("derived condition {} has no ancestor", derived.id)))?;
            if derived.timer.is_some() && base.timer.is_none() {
                return Err(fail(format!("derived timer {} overrides a simple condition", derived.id)));
            }
            if !derived_seen.insert(derived.id) {
                return Err(fail(format!("condition {} derived twice", derived.id)));
            }
        }

        let (mut slots, mut layout) = match &self.superclass {
            Some(s) => (s.slots.clone(), s.layout.clone()),
            None => (HashMap::new(), Vec::new()),
        };
        for base in &self.base_conds {
            slots.insert(base.id, layout.len());
            layout.push(match base.timer {
                Some(ticks) => SlotKind::Timer(ticks),
                None => SlotKind::Simple,
            });
        }
        for derived in &self.derived_conds {
            if let (Some(ticks), Some(&slot)) = (derived.timer, slots.get(&derived.id)) {
                layout[slot] = SlotKind::Timer(ticks);
            }
        }

        let mut states = HashSet::new();
        for rotary in &self.rotaries {
            if rotary.state.is_pending() {
                return Err(fail(format!("rotary declared for pending state {}", rotary.state)));
            }
            if !states.insert(rotary.state) {
                return Err(fail(format!("two rotaries for {}", rotary.state)));
            }
            if let Some(entry) = rotary.entries.iter().find(|e| !slots.contains_key(&e.cond)) {
                return Err(fail(format!(
                    "rotary {} references unknown condition {}",
                    rotary.state, entry.cond
                )));
            }
        }

        Ok(Arc::new(ClassConst {
            canary: Canary::CLASS_CONST,
            id,
            name: self.name,
            superclass: self.superclass,
            base_conds: self.base_conds,
            derived_conds: self.derived_conds,
            rotaries: self.rotaries,
            online: self.online,
            pending: self.pending,
            reschedule: self.reschedule,
            slots,
            layout,
        }))
    }
}
