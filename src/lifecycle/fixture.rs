//! Two-level class hierarchy and a recording object shared by engine tests.
//!
//! ```text
//! base (1)                               leaf (2) ─► base
//!   A "a"     Ready ─► Fail                P "p"
//!   T "tick"  timer, 1s                    B "b"
//!   G "go"    no-set, Specialize ─► Ready  rotary(Ready)   [P preset, A, B]
//!   rotary(Specialize) [G preset]          rotary(Destroy) [B]
//!   rotary(Ready)      [T]
//!   online, Ready interval 500ms
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    BaseCond, Canary, ClassConst, ClassId, CondId, InstanceState, LifecycleObject, LifecycleState,
    LifecycleStatus, ObjectId, RotaryCond,
};

pub(crate) const BASE: ClassId = ClassId(1);
pub(crate) const LEAF: ClassId = ClassId(2);

pub(crate) const A: CondId = CondId::new(BASE, 1);
pub(crate) const T: CondId = CondId::new(BASE, 2);
pub(crate) const G: CondId = CondId::new(BASE, 3);
pub(crate) const P: CondId = CondId::new(LEAF, 1);
pub(crate) const B: CondId = CondId::new(LEAF, 2);

pub(crate) const T_TICKS: u32 = 100;
pub(crate) const READY_MS: u32 = 500;

pub(crate) struct Fixture {
    pub(crate) base: Arc<ClassConst<Tracked>>,
    pub(crate) leaf: Arc<ClassConst<Tracked>>,
}

/// Object that records every handler call and replays scripted results.
pub(crate) struct Tracked {
    id: ObjectId,
    lc: InstanceState,
    log: Mutex<Vec<&'static str>>,
    script: Mutex<HashMap<&'static str, VecDeque<LifecycleStatus>>>,
}

impl Tracked {
    pub(crate) fn new(id: u64, class: &ClassConst<Tracked>) -> Self {
        Self {
            id: ObjectId(id),
            lc: InstanceState::new(class),
            log: Mutex::new(Vec::new()),
            script: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn note(&self, name: &'static str) {
        self.log.lock().push(name);
    }

    pub(crate) fn runs(&self, name: &str) -> usize {
        self.log.lock().iter().filter(|n| **n == name).count()
    }

    pub(crate) fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Queues results for handler `name`; once drained it returns `Done`.
    pub(crate) fn script(&self, name: &'static str, statuses: impl IntoIterator<Item = LifecycleStatus>) {
        self.script
            .lock()
            .entry(name)
            .or_default()
            .extend(statuses);
    }

    pub(crate) fn corrupt(&mut self) {
        self.lc.canary = Canary::poisoned();
    }

    fn next_status(&self, name: &'static str) -> LifecycleStatus {
        self.script
            .lock()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(LifecycleStatus::Done)
    }
}

impl LifecycleObject for Tracked {
    type Packet = Vec<&'static str>;

    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn lifecycle(&self) -> &InstanceState {
        &self.lc
    }
}

/// Handler that logs `name` on the object and the packet.
pub(crate) fn recorder(
    name: &'static str,
) -> impl Fn(&Tracked, &mut Vec<&'static str>) -> LifecycleStatus + Send + Sync + 'static {
    move |obj: &Tracked, pkt: &mut Vec<&'static str>| {
        obj.note(name);
        pkt.push(name);
        obj.next_status(name)
    }
}

pub(crate) fn build() -> Fixture {
    let base = ClassConst::<Tracked>::builder(BASE, "base")
        .base_cond(
            BaseCond::new("a", A)
                .transition(LifecycleState::Ready, LifecycleState::Fail)
                .handler(recorder("base.a")),
        )
        .base_cond(BaseCond::new("tick", T).timer(T_TICKS).handler(recorder("base.t")))
        .base_cond(
            BaseCond::new("go", G)
                .no_set()
                .transition(LifecycleState::Specialize, LifecycleState::Ready)
                .handler(recorder("base.g")),
        )
        .rotary(LifecycleState::Specialize, [RotaryCond::new(G).preset()])
        .rotary(LifecycleState::Ready, [RotaryCond::new(T)])
        .reschedule(LifecycleState::Ready, READY_MS)
        .online(recorder("base.online"))
        .build()
        .expect("base class");

    let leaf = ClassConst::<Tracked>::builder(LEAF, "leaf")
        .superclass(base.clone())
        .base_cond(BaseCond::new("p", P).handler(recorder("leaf.p")))
        .base_cond(BaseCond::new("b", B).handler(recorder("leaf.b")))
        .rotary(
            LifecycleState::Ready,
            [RotaryCond::new(P).preset(), RotaryCond::new(A), RotaryCond::new(B)],
        )
        .rotary(LifecycleState::Destroy, [RotaryCond::new(B)])
        .build()
        .expect("leaf class");

    Fixture { base, leaf }
}
