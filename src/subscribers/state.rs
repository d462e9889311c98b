//! # Object state tracker with sequence-based ordering.
//!
//! Keeps the last observed lifecycle state of every monitored object and whether
//! its monitor is still running. Event sequence numbers guard against
//! out-of-order delivery.
//!
//! ## Architecture
//! ```text
//! MonitorActor ──► Bus ──► subscriber_listener() ──► SubscriberSet ──► StateTracker::update()
//!                                                                              │
//!                                                                              ▼
//!                                                              HashMap<ObjectId, ObjectView>
//!                                                                  (id → {seq, state, alive})
//! ```
//!
//! ## Rules
//! - `ObjectAdded` marks the object alive and records its state
//! - `StateChanged` records the new state
//! - `ObjectDestroyed` / `ObjectFenced` / `ObjectRemoved` mark it not alive
//! - Events with `seq <= last_seq` are **rejected** (stale)
//! - Reads are **eventually consistent**

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};
use crate::lifecycle::{LifecycleState, ObjectId};
use crate::subscribers::Subscribe;

#[derive(Debug, Clone, Copy)]
struct ObjectView {
    last_seq: u64,
    state: Option<LifecycleState>,
    alive: bool,
}

/// Thread-safe view of monitored objects, fed from the event stream.
pub struct StateTracker {
    state: RwLock<HashMap<ObjectId, ObjectView>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Applies an event if it is newer than the last one seen for its object.
    ///
    /// Returns `true` when the view changed.
    /// ```text
    /// update(ObjectRemoved, seq=100) → alive=false, last_seq=100
    /// update(StateChanged,  seq=99)  → rejected (stale)
    /// ```
    pub async fn update(&self, ev: &Event) -> bool {
        let Some(id) = ev.object else {
            return false;
        };

        let mut state = self.state.write().await;
        let entry = state.entry(id).or_insert(ObjectView {
            last_seq: 0,
            state: None,
            alive: false,
        });

        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        match ev.kind {
            EventKind::ObjectAdded => {
                entry.alive = true;
                if ev.new_state.is_some() {
                    entry.state = ev.new_state;
                }
                true
            }
            EventKind::StateChanged => {
                entry.state = ev.new_state;
                true
            }
            EventKind::ObjectDestroyed | EventKind::ObjectFenced | EventKind::ObjectRemoved => {
                entry.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Returns the sorted ids of objects whose monitor is running.
    pub async fn snapshot(&self) -> Vec<ObjectId> {
        let state = self.state.read().await;
        let mut alive: Vec<ObjectId> = state
            .iter()
            .filter(|(_, v)| v.alive)
            .map(|(id, _)| *id)
            .collect();
        alive.sort_unstable();
        alive
    }

    /// Returns the last observed state of the object.
    pub async fn state_of(&self, id: ObjectId) -> Option<LifecycleState> {
        self.state.read().await.get(&id).and_then(|v| v.state)
    }

    /// Returns true if the object's monitor is running.
    pub async fn is_alive(&self, id: ObjectId) -> bool {
        self.state
            .read()
            .await
            .get(&id)
            .is_some_and(|v| v.alive)
    }
}

#[async_trait]
impl Subscribe for StateTracker {
    async fn on_event(&self, event: &Event) {
        self.update(event).await;
    }

    fn name(&self) -> &'static str {
        "StateTracker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracks_state_and_liveness() {
        let t = StateTracker::new();
        let id = ObjectId(4);

        assert!(
            t.update(
                &Event::new(EventKind::ObjectAdded)
                    .with_object(id)
                    .with_state(LifecycleState::Specialize)
            )
            .await
        );
        t.update(
            &Event::new(EventKind::StateChanged)
                .with_object(id)
                .with_transition(LifecycleState::Specialize, LifecycleState::Ready),
        )
        .await;
        assert_eq!(t.snapshot().await, vec![id]);
        assert_eq!(t.state_of(id).await, Some(LifecycleState::Ready));

        t.update(&Event::new(EventKind::ObjectFenced).with_object(id))
            .await;
        assert!(!t.is_alive(id).await);
        assert_eq!(t.state_of(id).await, Some(LifecycleState::Ready));
    }

    #[tokio::test]
    async fn test_stale_event_rejected() {
        let t = StateTracker::new();
        let id = ObjectId(1);
        let stale = Event::new(EventKind::ObjectAdded).with_object(id);
        let removed = Event::new(EventKind::ObjectRemoved).with_object(id);

        assert!(t.update(&removed).await);
        assert!(!t.update(&stale).await);
        assert!(t.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_events_without_object_ignored() {
        let t = StateTracker::new();
        assert!(!t.update(&Event::new(EventKind::ShutdownRequested)).await);
    }
}
