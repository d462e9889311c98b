//! # Event bus for scheduler notifications.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]: monitor actors,
//! the registry and the scheduler publish, and listeners receive clones.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                 Listeners:
//!   MonitorActor 1 ──┐
//!   MonitorActor 2 ──┼──► Bus ──► subscriber_listener ──► SubscriberSet
//!   Registry       ──┤
//!   Scheduler      ──┘
//! ```
//!
//! ## Rules
//! - `publish()` never blocks.
//! - A single ring buffer of `capacity` events is shared by all receivers.
//! - Slow receivers get `RecvError::Lagged(n)` and skip the `n` oldest items.
//! - Events published while nobody listens are dropped.
//! - Nothing that controls objects listens here; the registry has its own inbox.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for scheduler events.
///
/// Cheap to clone (holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver observing events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
