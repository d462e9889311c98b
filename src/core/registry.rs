//! # Object registry: monitor lifecycle manager.
//!
//! The registry owns one actor per monitored object. It is driven by its own
//! unbounded inbox, never by the lossy event bus, so no request or exit is
//! dropped when the bus lags:
//! - `Command::Add` → spawn an actor and register it
//! - `Command::Remove` → cancel, join and forget the actor
//! - `Command::Exited` → the actor retired or was fenced on its own; join and forget
//!
//! ## Architecture
//! ```text
//! Scheduler ── Add / Remove ──┐
//!                             ▼
//!                      inbox (mpsc) ──► Registry listener
//!                             ▲           ├─► add(monitor)
//! actor wrapper ── Exited ────┘           ├─► remove(id)
//!                                         └─► cleanup(id, generation)
//!
//! live count (watch) ──► Scheduler waits for 0 (every object gone)
//! ```
//!
//! ## Rules
//! - One actor per `ObjectId`; a duplicate add is rejected (`RequestRejected`)
//! - Every registered actor ends with exactly one `ObjectRemoved`
//! - An exit only forgets the handle of the generation that sent it
//! - Objects being stopped by [`Registry::cancel_all`] are tracked so a grace
//!   overrun can name them

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::actor::{ActorExitReason, MonitorActor, MonitorActorParams};
use crate::core::monitor::MonitorRef;
use crate::events::{Bus, Event, EventKind};
use crate::lifecycle::ObjectId;

/// Message for the registry listener.
pub(crate) enum Command {
    /// Start monitoring.
    Add(MonitorRef),
    /// Stop monitoring; the object itself is untouched.
    Remove(ObjectId),
    /// An actor stopped without being cancelled.
    Exited { id: ObjectId, generation: u64 },
}

/// Handle to a running monitor actor.
struct Handle {
    join: JoinHandle<ActorExitReason>,
    cancel: CancellationToken,
    generation: u64,
}

/// Registry of running monitor actors.
pub(crate) struct Registry {
    objects: RwLock<HashMap<ObjectId, Handle>>,
    live: watch::Sender<usize>,
    stopping: parking_lot::Mutex<BTreeSet<ObjectId>>,
    commands: mpsc::UnboundedSender<Command>,
    inbox: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    next_generation: AtomicU64,
    bus: Bus,
    runtime_token: CancellationToken,
    semaphore: Option<Arc<Semaphore>>,
    params: MonitorActorParams,
}

impl Registry {
    pub(crate) fn new(
        bus: Bus,
        runtime_token: CancellationToken,
        semaphore: Option<Arc<Semaphore>>,
        params: MonitorActorParams,
    ) -> Arc<Self> {
        let (live, _) = watch::channel(0);
        let (commands, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            objects: RwLock::new(HashMap::new()),
            live,
            stopping: parking_lot::Mutex::new(BTreeSet::new()),
            commands,
            inbox: parking_lot::Mutex::new(Some(inbox)),
            next_generation: AtomicU64::new(0),
            bus,
            runtime_token,
            semaphore,
            params,
        })
    }

    /// Spawns the inbox listener. Only the first call has an effect.
    ///
    /// The listener stops with the runtime token.
    pub(crate) fn spawn_listener(self: Arc<Self>) {
        let Some(mut inbox) = self.inbox.lock().take() else {
            tracing::warn!("registry listener already running");
            return;
        };
        let rt = self.runtime_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rt.cancelled() => break,
                    cmd = inbox.recv() => match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
            }
        });
    }

    /// Queues `cmd` for the listener.
    pub(crate) fn request(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::warn!("registry stopped, request dropped");
        }
    }

    async fn handle(&self, cmd: Command) {
        match cmd {
            Command::Add(monitor) => {
                self.add(monitor).await;
            }
            Command::Remove(id) => self.remove(id).await,
            Command::Exited { id, generation } => self.cleanup(id, generation).await,
        }
    }

    /// Spawns an actor for `monitor` and registers it.
    ///
    /// Returns `false` (and publishes `RequestRejected`) if the id is taken.
    pub(crate) async fn add(&self, monitor: MonitorRef) -> bool {
        let id = monitor.object_id();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&id) {
            drop(objects);
            self.bus.publish(
                Event::new(EventKind::RequestRejected)
                    .with_source(monitor.as_ref())
                    .with_reason("object_already_exists"),
            );
            return false;
        }

        let state = monitor.state().ok();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.runtime_token.child_token();
        let actor = MonitorActor::new(
            self.bus.clone(),
            monitor.clone(),
            self.params.clone(),
            self.semaphore.clone(),
        );
        let exits = self.commands.clone();
        let actor_token = token.clone();
        let join = tokio::spawn(async move {
            let reason = actor.run(actor_token).await;
            if reason != ActorExitReason::Cancelled {
                // whoever cancelled holds the handle and reports the removal
                let _ = exits.send(Command::Exited { id, generation });
            }
            reason
        });
        objects.insert(
            id,
            Handle {
                join,
                cancel: token,
                generation,
            },
        );
        self.live.send_replace(objects.len());
        drop(objects);

        let mut ev = Event::new(EventKind::ObjectAdded).with_source(monitor.as_ref());
        if let Some(state) = state {
            ev = ev.with_state(state);
        }
        self.bus.publish(ev);
        true
    }

    /// Sorted ids of registered objects.
    pub(crate) async fn list(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Resolves once no object is registered.
    pub(crate) async fn wait_empty(&self) {
        let mut rx = self.live.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Cancels every actor and joins them: cancel → join → `ObjectRemoved`.
    pub(crate) async fn cancel_all(&self) {
        let handles: Vec<(ObjectId, Handle)> = {
            let mut objects = self.objects.write().await;
            let drained = objects.drain().collect();
            self.live.send_replace(0);
            drained
        };

        self.stopping
            .lock()
            .extend(handles.iter().map(|(id, _)| *id));
        for (_, h) in &handles {
            h.cancel.cancel();
        }
        for (id, h) in handles {
            self.join_and_report(id, h.join).await;
            self.stopping.lock().remove(&id);
        }
    }

    /// Objects that were told to stop and have not stopped yet.
    pub(crate) fn stuck(&self) -> Vec<ObjectId> {
        self.stopping.lock().iter().copied().collect()
    }

    async fn remove(&self, id: ObjectId) {
        match self.take_handle(id, None).await {
            Some(handle) => {
                handle.cancel.cancel();
                self.join_and_report(id, handle.join).await;
            }
            None => self.bus.publish(
                Event::new(EventKind::RequestRejected)
                    .with_object(id)
                    .with_reason("object_not_found"),
            ),
        }
    }

    /// The actor already exited; join it and report.
    async fn cleanup(&self, id: ObjectId, generation: u64) {
        if let Some(handle) = self.take_handle(id, Some(generation)).await {
            self.join_and_report(id, handle.join).await;
        }
    }

    /// Removes the handle of `id`, restricted to `generation` when given.
    async fn take_handle(&self, id: ObjectId, generation: Option<u64>) -> Option<Handle> {
        let mut objects = self.objects.write().await;
        let matches = objects
            .get(&id)
            .is_some_and(|h| generation.is_none_or(|g| g == h.generation));
        if !matches {
            return None;
        }
        let handle = objects.remove(&id);
        self.live.send_replace(objects.len());
        handle
    }

    async fn join_and_report(&self, id: ObjectId, join: JoinHandle<ActorExitReason>) {
        match join.await {
            Ok(reason) => {
                tracing::debug!(object = %id, reason = ?reason, "monitor stopped");
            }
            Err(err) => {
                tracing::error!(object = %id, error = %err, "monitor actor died");
            }
        }
        self.bus
            .publish(Event::new(EventKind::ObjectRemoved).with_object(id));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::monitor::ClassMonitor;
    use crate::lifecycle::fixture::{self, Tracked};
    use crate::policies::BackoffPolicy;

    fn registry(bus: &Bus) -> Arc<Registry> {
        Registry::new(
            bus.clone(),
            CancellationToken::new(),
            None,
            MonitorActorParams {
                pending_poll: Duration::from_secs(3),
                backoff: BackoffPolicy::default(),
                fence_on_fatal: true,
            },
        )
    }

    fn monitor(fx: &fixture::Fixture, id: u64) -> MonitorRef {
        ClassMonitor::with_default_packet(fx.leaf.clone(), Arc::new(Tracked::new(id, &fx.leaf)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_add_rejected() {
        let fx = fixture::build();
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let reg = registry(&bus);

        assert!(reg.add(monitor(&fx, 1)).await);
        assert!(!reg.add(monitor(&fx, 1)).await);
        assert_eq!(reg.list().await, vec![ObjectId(1)]);

        let added = rx.recv().await.unwrap();
        assert_eq!(added.kind, EventKind::ObjectAdded);
        assert_eq!(added.new_state, Some(crate::LifecycleState::Specialize));
        let rejected = rx.recv().await.unwrap();
        assert_eq!(rejected.kind, EventKind::RequestRejected);
        assert_eq!(rejected.reason.as_deref(), Some("object_already_exists"));

        reg.cancel_all().await;
        assert!(reg.stuck().is_empty());
        reg.wait_empty().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_through_inbox() {
        let fx = fixture::build();
        let bus = Bus::new(64);
        let reg = registry(&bus);
        reg.clone().spawn_listener();
        let mut rx = bus.subscribe();

        reg.request(Command::Add(monitor(&fx, 2)));
        reg.request(Command::Remove(ObjectId(2)));
        reg.request(Command::Remove(ObjectId(9)));

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let ev = rx.recv().await.unwrap();
            seen.push((ev.kind, ev.object));
        }
        assert_eq!(
            seen,
            vec![
                (EventKind::ObjectAdded, Some(ObjectId(2))),
                (EventKind::ObjectRemoved, Some(ObjectId(2))),
                (EventKind::RequestRejected, Some(ObjectId(9))),
            ]
        );
        reg.wait_empty().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_actors_forgotten_without_bus() {
        let fx = fixture::build();
        // a one-slot bus lags immediately; exits must still reach the registry
        let bus = Bus::new(1);
        let reg = registry(&bus);
        reg.clone().spawn_listener();

        for id in 0..50 {
            let obj = Tracked::new(id, &fx.leaf);
            fx.leaf
                .set_state(&obj, crate::LifecycleState::PendingDestroy)
                .unwrap();
            let m = ClassMonitor::with_default_packet(fx.leaf.clone(), Arc::new(obj));
            assert!(reg.add(m).await);
        }

        tokio::time::timeout(Duration::from_secs(60), reg.wait_empty())
            .await
            .expect("every retired actor is forgotten");
        assert!(reg.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_exit_keeps_readded_object() {
        let fx = fixture::build();
        let bus = Bus::new(64);
        let reg = registry(&bus);
        reg.clone().spawn_listener();

        assert!(reg.add(monitor(&fx, 4)).await);
        let current = reg.objects.read().await[&ObjectId(4)].generation;
        reg.request(Command::Exited {
            id: ObjectId(4),
            generation: current + 1,
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(reg.list().await, vec![ObjectId(4)]);

        reg.cancel_all().await;
    }
}
