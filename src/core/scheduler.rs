//! # Scheduler: cranks monitored objects, fans out events, shuts down gracefully.
//!
//! The [`Scheduler`] owns the event bus, a [`SubscriberSet`], the object
//! registry and an optional global crank semaphore. It is the async driver the
//! lifecycle engine leaves to its embedder: one actor per object, cranking when
//! the engine asks to be cranked.
//!
//! ## High-level architecture
//! ```text
//! run(objects)
//!   └─► registry.add(monitor) for each ──► MonitorActor per object
//!                                             (child CancellationToken)
//!
//! Event flow:
//!   MonitorActor / Registry / Scheduler ── publish ──► Bus
//!       └──► subscriber listener ──► SubscriberSet ──► StateTracker, LogWriter, ...
//!
//! Runtime control (registry inbox, lossless):
//!   add_object(m)     ──► Command::Add    ──► registry   (+ ObjectAddRequested on the bus)
//!   remove_object(id) ──► Command::Remove ──► registry   (+ ObjectRemoveRequested on the bus)
//!   actor retired / fenced ──► Command::Exited ──► registry
//!
//! Exit paths:
//!   every object removed (retired, fenced, removed) ──► Ok(())
//!   OS signal or shutdown()
//!       └─► ShutdownRequested, runtime_token.cancel()
//!       └─► cancel_all() within cfg.grace:
//!              ├─ joined in time → AllStoppedWithin, Ok(())
//!              └─ timeout        → GraceExceeded, Err(GraceExceeded { stuck })
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lifecrank::{MonitorRef, Scheduler, SchedulerConfig, Subscribe};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = SchedulerConfig::default();
//!     cfg.max_concurrent = 8;
//!     cfg.grace = Duration::from_secs(5);
//!
//!     let mut subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!     #[cfg(feature = "logging")]
//!     subs.push(Arc::new(lifecrank::LogWriter::new()));
//!
//!     let scheduler = Scheduler::builder(cfg).with_subscribers(subs).build();
//!     let objects: Vec<MonitorRef> = Vec::new(); // ClassMonitor::with_default_packet(..)
//!     scheduler.run(objects).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::builder::SchedulerBuilder;
use super::monitor::MonitorRef;
use super::registry::{Command, Registry};
use super::shutdown;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::events::{Bus, Event, EventKind};
use crate::lifecycle::ObjectId;
use crate::subscribers::{StateTracker, SubscriberSet};

/// Drives monitored objects until they retire or shutdown is requested.
pub struct Scheduler {
    cfg: SchedulerConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    tracker: Arc<StateTracker>,
    registry: Arc<Registry>,
    runtime_token: CancellationToken,
}

impl Scheduler {
    /// Starts building a scheduler.
    pub fn builder(cfg: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: SchedulerConfig,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        tracker: Arc<StateTracker>,
        registry: Arc<Registry>,
        runtime_token: CancellationToken,
    ) -> Self {
        let scheduler = Self {
            cfg,
            bus,
            subs,
            tracker,
            registry,
            runtime_token,
        };
        scheduler.subscriber_listener();
        scheduler
    }

    /// Monitors `objects` until either:
    /// - no object is left (all retired, fenced or removed), or
    /// - a termination signal or [`Scheduler::shutdown`] → graceful stop within `grace`.
    ///
    /// With an empty list and nothing added, returns at once.
    pub async fn run(&self, objects: Vec<MonitorRef>) -> Result<(), SchedulerError> {
        for monitor in objects {
            self.registry.add(monitor).await;
        }
        self.drive_shutdown().await
    }

    /// Requests monitoring of `monitor` while running.
    ///
    /// Rejected with `RequestRejected` if its id is already monitored.
    pub fn add_object(&self, monitor: MonitorRef) {
        self.bus
            .publish(Event::new(EventKind::ObjectAddRequested).with_source(monitor.as_ref()));
        self.registry.request(Command::Add(monitor));
    }

    /// Requests that `id` stop being monitored. The object itself is untouched.
    pub fn remove_object(&self, id: ObjectId) {
        self.bus
            .publish(Event::new(EventKind::ObjectRemoveRequested).with_object(id));
        self.registry.request(Command::Remove(id));
    }

    /// Requests a graceful shutdown, as an OS signal would.
    pub fn shutdown(&self) {
        if !self.runtime_token.is_cancelled() {
            self.bus.publish(Event::new(EventKind::ShutdownRequested));
            self.runtime_token.cancel();
        }
    }

    /// Sorted ids of the objects currently monitored.
    pub async fn list(&self) -> Vec<ObjectId> {
        self.registry.list().await
    }

    /// Last known state of every object, as seen through events.
    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    /// Receiver for raw scheduler events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Forwards bus events to the subscriber set.
    fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn drive_shutdown(&self) -> Result<(), SchedulerError> {
        let signal = async {
            match shutdown::wait_for_shutdown_signal().await {
                Ok(name) => name,
                Err(err) => {
                    tracing::warn!(error = %err, "cannot listen for termination signals");
                    std::future::pending().await
                }
            }
        };

        tokio::select! {
            name = signal => {
                tracing::info!(signal = name, "termination signal received");
                self.shutdown();
                self.wait_all_with_grace().await
            }
            _ = self.runtime_token.cancelled() => {
                self.wait_all_with_grace().await
            }
            _ = self.registry.wait_empty() => {
                self.runtime_token.cancel();
                Ok(())
            }
        }
    }

    /// Stops every actor within the grace period.
    ///
    /// Publishes [`EventKind::AllStoppedWithin`] on success, or
    /// [`EventKind::GraceExceeded`] and returns [`SchedulerError::GraceExceeded`]
    /// naming the objects that did not stop.
    async fn wait_all_with_grace(&self) -> Result<(), SchedulerError> {
        let grace = self.cfg.grace;
        match tokio::time::timeout(grace, self.registry.cancel_all()).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                self.bus.publish(Event::new(EventKind::GraceExceeded));
                let stuck = self.registry.stuck();
                Err(SchedulerError::GraceExceeded { grace, stuck })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::core::ClassMonitor;
    use crate::lifecycle::fixture::{self, Tracked};
    use crate::lifecycle::LifecycleState;
    use crate::subscribers::Subscribe;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Event>>);

    impl Collect {
        fn kinds(&self) -> Vec<EventKind> {
            self.0.lock().iter().map(|e| e.kind).collect()
        }

        fn count(&self, kind: EventKind) -> usize {
            self.0.lock().iter().filter(|e| e.kind == kind).count()
        }
    }

    #[async_trait]
    impl Subscribe for Collect {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().push(ev.clone());
        }
        fn name(&self) -> &'static str {
            "collect"
        }
    }

    fn scheduler(cfg: SchedulerConfig) -> (Arc<Scheduler>, Arc<Collect>) {
        let collect = Arc::new(Collect::default());
        let s = Scheduler::builder(cfg)
            .with_subscribers(vec![collect.clone()])
            .build();
        (s, collect)
    }

    fn doomed(fx: &fixture::Fixture, id: u64) -> MonitorRef {
        let obj = Arc::new(Tracked::new(id, &fx.leaf));
        fx.leaf
            .set_state(&obj, LifecycleState::PendingDestroy)
            .unwrap();
        ClassMonitor::with_default_packet(fx.leaf.clone(), obj)
    }

    fn idle(fx: &fixture::Fixture, id: u64) -> MonitorRef {
        ClassMonitor::with_default_packet(fx.leaf.clone(), Arc::new(Tracked::new(id, &fx.leaf)))
    }

    /// Lets subscriber workers drain their queues.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ends_when_every_object_retired() {
        let fx = fixture::build();
        let mut cfg = SchedulerConfig::default();
        cfg.max_concurrent = 1;
        let (s, collect) = scheduler(cfg);

        s.run(vec![doomed(&fx, 1), doomed(&fx, 2), doomed(&fx, 3)])
            .await
            .unwrap();
        settle().await;

        assert_eq!(collect.count(EventKind::ObjectAdded), 3);
        assert_eq!(collect.count(EventKind::ObjectDestroyed), 3);
        assert_eq!(collect.count(EventKind::ObjectRemoved), 3);
        assert!(s.list().await.is_empty());
        assert!(s.tracker().snapshot().await.is_empty());
        assert_eq!(
            s.tracker().state_of(ObjectId(2)).await,
            Some(LifecycleState::Destroy)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fenced_object_is_dropped() {
        let fx = fixture::build();
        let mut obj = Tracked::new(4, &fx.leaf);
        obj.corrupt();
        let (s, collect) = scheduler(SchedulerConfig::default());

        s.run(vec![ClassMonitor::with_default_packet(
            fx.leaf.clone(),
            Arc::new(obj),
        )])
        .await
        .unwrap();
        settle().await;

        let kinds = collect.kinds();
        let failed = kinds.iter().position(|k| *k == EventKind::CrankFailed);
        let fenced = kinds.iter().position(|k| *k == EventKind::ObjectFenced);
        let removed = kinds.iter().position(|k| *k == EventKind::ObjectRemoved);
        assert!(failed < fenced && fenced < removed, "{kinds:?}");
        assert!(failed.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_within_grace() {
        let fx = fixture::build();
        let (s, collect) = scheduler(SchedulerConfig::default());

        let runner = s.clone();
        let objects = vec![idle(&fx, 5), idle(&fx, 6)];
        let join = tokio::spawn(async move { runner.run(objects).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(s.tracker().snapshot().await, vec![ObjectId(5), ObjectId(6)]);
        s.shutdown();
        join.await.unwrap().unwrap();
        settle().await;

        let kinds = collect.kinds();
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert_eq!(kinds.last(), Some(&EventKind::AllStoppedWithin), "{kinds:?}");
        assert_eq!(collect.count(EventKind::ObjectRemoved), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_add_and_remove() {
        let fx = fixture::build();
        let (s, collect) = scheduler(SchedulerConfig::default());

        let runner = s.clone();
        let first = idle(&fx, 7);
        let join = tokio::spawn(async move { runner.run(vec![first]).await });
        settle().await;

        s.add_object(idle(&fx, 8));
        s.add_object(idle(&fx, 8));
        settle().await;
        assert_eq!(s.list().await, vec![ObjectId(7), ObjectId(8)]);
        assert_eq!(collect.count(EventKind::RequestRejected), 1);

        s.remove_object(ObjectId(8));
        settle().await;
        assert_eq!(s.list().await, vec![ObjectId(7)]);
        assert!(!s.tracker().is_alive(ObjectId(8)).await);

        s.remove_object(ObjectId(7));
        join.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mass_retirement_with_tiny_bus() {
        let fx = fixture::build();
        let mut cfg = SchedulerConfig::default();
        cfg.bus_capacity = 4;
        let (s, _collect) = scheduler(cfg);

        let objects: Vec<_> = (0..256).map(|id| doomed(&fx, id)).collect();
        tokio::time::timeout(Duration::from_secs(3600), s.run(objects))
            .await
            .expect("run returns once every object retired")
            .unwrap();
        assert!(s.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_without_fencing() {
        let fx = fixture::build();
        let mut obj = Tracked::new(9, &fx.leaf);
        obj.corrupt();
        let mut cfg = SchedulerConfig::default();
        cfg.fence_on_fatal = false;
        let (s, collect) = scheduler(cfg);

        let runner = s.clone();
        let m = ClassMonitor::with_default_packet(fx.leaf.clone(), Arc::new(obj));
        let join = tokio::spawn(async move { runner.run(vec![m]).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        s.shutdown();
        join.await.unwrap().unwrap();
        settle().await;

        let attempts: Vec<_> = collect
            .0
            .lock()
            .iter()
            .filter(|e| e.kind == EventKind::CrankFailed)
            .map(|e| e.attempt)
            .collect();
        assert_eq!(attempts, vec![Some(1), Some(2)]);
        assert_eq!(collect.count(EventKind::ObjectFenced), 0);
    }
}
