//! # Monitor abstraction and class-backed implementation.
//!
//! The scheduler does not know object types or packet types. It drives
//! [`Monitor`] trait objects; [`ClassMonitor`] adapts any
//! [`LifecycleObject`] plus its leaf [`ClassConst`] to that interface.
//! The common handle type is [`MonitorRef`], an `Arc<dyn Monitor>`.
//!
//! ```text
//! ClassMonitor<O>
//!   ├── Arc<ClassConst<O>>   leaf class (crank_object, get_state)
//!   ├── Arc<O>               the object
//!   └── packet factory       fresh O::Packet per crank
//! ```
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use lifecrank::{
//!     BaseCond, ClassConst, ClassId, ClassMonitor, CondId, InstanceState, LifecycleObject,
//!     LifecycleState, LifecycleStatus, MonitorRef, ObjectId, RotaryCond,
//! };
//!
//! struct Disk { id: ObjectId, lc: InstanceState }
//!
//! impl LifecycleObject for Disk {
//!     type Packet = ();
//!     fn object_id(&self) -> ObjectId { self.id }
//!     fn lifecycle(&self) -> &InstanceState { &self.lc }
//! }
//!
//! let spin_up = CondId::new(ClassId(1), 1);
//! let class = ClassConst::<Disk>::builder(ClassId(1), "disk")
//!     .base_cond(BaseCond::<Disk>::new("spin_up", spin_up).handler(|_, _| LifecycleStatus::Done))
//!     .rotary(LifecycleState::Specialize, [RotaryCond::new(spin_up).preset()])
//!     .build()
//!     .unwrap();
//!
//! let disk = Arc::new(Disk { id: ObjectId(9), lc: InstanceState::new(&class) });
//! let m: MonitorRef = ClassMonitor::with_default_packet(class, disk);
//! assert_eq!(m.object_id(), ObjectId(9));
//! assert_eq!(m.state().unwrap(), LifecycleState::Specialize);
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::LifecycleError;
use crate::lifecycle::{ClassConst, ClassId, LifecycleObject, LifecycleState, LifecycleStatus, ObjectId};

/// Shared handle to a monitored object.
pub type MonitorRef = Arc<dyn Monitor>;

/// One object as the scheduler sees it.
///
/// `crank` runs synchronously on the actor's task; handlers are expected to
/// return promptly and report long work as `Pending`.
pub trait Monitor: Send + Sync + 'static {
    /// Stable object identifier (registry key).
    fn object_id(&self) -> ObjectId;

    /// Leaf class of the object.
    fn class_id(&self) -> ClassId;

    /// Runs one crank.
    fn crank(&self) -> Result<LifecycleStatus, LifecycleError>;

    /// Current lifecycle state.
    fn state(&self) -> Result<LifecycleState, LifecycleError>;

    /// Handle signalled when the object wants an early crank.
    fn wakeup(&self) -> Arc<Notify>;

    /// True once Destroy has completed.
    fn is_retired(&self) -> bool;
}

type PacketFactory<P> = Box<dyn Fn() -> P + Send + Sync>;

/// [`Monitor`] backed by a class constant and a packet factory.
pub struct ClassMonitor<O: LifecycleObject> {
    class: Arc<ClassConst<O>>,
    object: Arc<O>,
    packet: PacketFactory<O::Packet>,
}

impl<O: LifecycleObject> ClassMonitor<O> {
    /// Pairs `object` with its leaf class; `packet` builds the per-crank context.
    pub fn new<F>(class: Arc<ClassConst<O>>, object: Arc<O>, packet: F) -> Self
    where
        F: Fn() -> O::Packet + Send + Sync + 'static,
    {
        Self {
            class,
            object,
            packet: Box::new(packet),
        }
    }

    /// Like [`ClassMonitor::new`], returned as a [`MonitorRef`].
    pub fn arc<F>(class: Arc<ClassConst<O>>, object: Arc<O>, packet: F) -> MonitorRef
    where
        F: Fn() -> O::Packet + Send + Sync + 'static,
    {
        Arc::new(Self::new(class, object, packet))
    }

    /// The monitored object.
    pub fn object(&self) -> &Arc<O> {
        &self.object
    }
}

impl<O> ClassMonitor<O>
where
    O: LifecycleObject,
    O::Packet: Default,
{
    /// Monitor that hands every crank a `Default` packet.
    pub fn with_default_packet(class: Arc<ClassConst<O>>, object: Arc<O>) -> MonitorRef {
        Self::arc(class, object, Default::default)
    }
}

impl<O: LifecycleObject> Monitor for ClassMonitor<O> {
    fn object_id(&self) -> ObjectId {
        self.object.object_id()
    }

    fn class_id(&self) -> ClassId {
        self.class.id()
    }

    fn crank(&self) -> Result<LifecycleStatus, LifecycleError> {
        let mut packet = (self.packet)();
        self.class.crank_object(&self.object, &mut packet)
    }

    fn state(&self) -> Result<LifecycleState, LifecycleError> {
        self.class.get_state(&self.object)
    }

    fn wakeup(&self) -> Arc<Notify> {
        self.object.lifecycle().wakeup()
    }

    fn is_retired(&self) -> bool {
        self.object.lifecycle().is_retired()
    }
}

impl<O: LifecycleObject> fmt::Debug for ClassMonitor<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMonitor")
            .field("object", &self.object.object_id())
            .field("class", &self.class.id())
            .finish()
    }
}
