//! # Lifecycle notifications emitted by the monitor scheduler.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Object events**: what a crank did to an object (state changed, crank failed,
//!   fenced, destroyed)
//! - **Management events**: runtime object control (add/remove requests and confirmations)
//! - **Shutdown events**: signal observed, grace outcome
//! - **Subscriber events**: fan-out health (overflow, panic)
//!
//! The [`Event`] struct carries the metadata relevant to its kind: object and
//! class ids, old/new state, failure reason, retry delay.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use lifecrank::{Event, EventKind, LifecycleState, ObjectId};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_object(ObjectId(7))
//!     .with_transition(LifecycleState::PendingReady, LifecycleState::Ready);
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.object, Some(ObjectId(7)));
//! assert_eq!(ev.new_state, Some(LifecycleState::Ready));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::core::Monitor;
use crate::lifecycle::{ClassId, LifecycleState, ObjectId};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of scheduler events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: panic message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: `"full"` or `"closed"`
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or [`Scheduler::shutdown`](crate::Scheduler::shutdown)).
    ShutdownRequested,

    /// Every monitor stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some monitors did not stop in time.
    GraceExceeded,

    // === Object events ===
    /// A crank left the object in a different state than it started in.
    ///
    /// Sets:
    /// - `object`, `class`
    /// - `old_state`, `new_state`
    StateChanged,

    /// A crank returned an error.
    ///
    /// Sets:
    /// - `object`, `class`
    /// - `attempt`: consecutive failures so far (1-based)
    /// - `delay_ms`: wait before the next crank (absent when the object is fenced)
    /// - `reason`: error message
    CrankFailed,

    /// The object will not be cranked again after a fatal engine error.
    ///
    /// Sets:
    /// - `object`, `class`
    /// - `reason`: error label
    ObjectFenced,

    /// The object completed Destroy and was retired.
    ///
    /// Sets:
    /// - `object`, `class`
    ObjectDestroyed,

    // === Runtime management events ===
    /// Request to start monitoring an object (informational; the registry
    /// receives the monitor over its own channel).
    ///
    /// Sets:
    /// - `object`, `class`
    ObjectAddRequested,

    /// Monitor spawned and registered.
    ///
    /// Sets:
    /// - `object`, `class`
    /// - `new_state`: state at registration
    ObjectAdded,

    /// Request to stop monitoring an object (informational).
    ///
    /// Sets:
    /// - `object`
    ObjectRemoveRequested,

    /// Monitor stopped and joined.
    ///
    /// Sets:
    /// - `object`
    ObjectRemoved,

    /// An add or remove request could not be honored.
    ///
    /// Sets:
    /// - `object`
    /// - `reason`: `"object_already_exists"` or `"object_not_found"`
    RequestRejected,
}

impl EventKind {
    /// Stable short label used in logs.
    pub fn as_label(self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber-panicked",
            EventKind::SubscriberOverflow => "subscriber-overflow",
            EventKind::ShutdownRequested => "shutdown-requested",
            EventKind::AllStoppedWithin => "all-stopped-within-grace",
            EventKind::GraceExceeded => "grace-exceeded",
            EventKind::StateChanged => "state-changed",
            EventKind::CrankFailed => "crank-failed",
            EventKind::ObjectFenced => "object-fenced",
            EventKind::ObjectDestroyed => "object-destroyed",
            EventKind::ObjectAddRequested => "object-add-requested",
            EventKind::ObjectAdded => "object-added",
            EventKind::ObjectRemoveRequested => "object-remove-requested",
            EventKind::ObjectRemoved => "object-removed",
            EventKind::RequestRejected => "request-rejected",
        }
    }
}

/// Scheduler event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Object concerned, if any.
    pub object: Option<ObjectId>,
    /// Leaf class of the object.
    pub class: Option<ClassId>,
    /// State before the change.
    pub old_state: Option<LifecycleState>,
    /// State after the change (or at registration).
    pub new_state: Option<LifecycleState>,
    /// Delay before the next crank in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Consecutive failure count (starting from 1).
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Subscriber name for subscriber events.
    pub subscriber: Option<&'static str>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("seq", &self.seq)
            .field("kind", &self.kind)
            .field("object", &self.object)
            .field("class", &self.class)
            .field("old_state", &self.old_state)
            .field("new_state", &self.new_state)
            .field("delay_ms", &self.delay_ms)
            .field("attempt", &self.attempt)
            .field("reason", &self.reason)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            object: None,
            class: None,
            old_state: None,
            new_state: None,
            delay_ms: None,
            attempt: None,
            reason: None,
            subscriber: None,
        }
    }

    /// Attaches the object id.
    #[inline]
    pub fn with_object(mut self, object: ObjectId) -> Self {
        self.object = Some(object);
        self
    }

    /// Attaches the class id.
    #[inline]
    pub fn with_class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }

    /// Attaches the state reached.
    #[inline]
    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.new_state = Some(state);
        self
    }

    /// Attaches both ends of a state change.
    #[inline]
    pub fn with_transition(mut self, old: LifecycleState, new: LifecycleState) -> Self {
        self.old_state = Some(old);
        self.new_state = Some(new);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a failure count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Attaches the object and class ids of `monitor`.
    #[inline]
    pub(crate) fn with_source(self, monitor: &dyn Monitor) -> Self {
        self.with_object(monitor.object_id())
            .with_class(monitor.class_id())
    }
}
