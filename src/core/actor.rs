//! # MonitorActor: drives one object.
//!
//! Cranks one [`Monitor`] for as long as the object lives, translating each
//! crank outcome into a wait:
//!
//! ```text
//! loop {
//!   ├─► acquire semaphore (cancellable)
//!   ├─► crank() ─────────► Ok(status) / Err(e) / panic
//!   ├─► release permit, publish StateChanged if the state moved
//!   ├─► retired?            → ObjectDestroyed, exit
//!   ├─► Continue            → yield, crank again
//!   ├─► Reschedule(ms)      → wait ms
//!   ├─► Pending / Done      → wait pending_poll
//!   ├─► Err (fatal, fence)  → CrankFailed + ObjectFenced, exit
//!   ├─► Err / panic         → CrankFailed, wait backoff.delay_after(failures)
//!   └─► wait: sleep | object wakeup | cancel
//! }
//! ```
//!
//! ## Rules
//! - Cranks of one object run **sequentially** (one actor per object)
//! - Cancellation is observed at **safe points** (semaphore acquire, waits), never mid-crank
//! - A wakeup signalled during a crank is kept and ends the following wait early
//! - The failure counter **resets** on the first successful crank

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::{select, sync::Semaphore, time};
use tokio_util::sync::CancellationToken;

use crate::core::monitor::MonitorRef;
use crate::error::{LifecycleError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::lifecycle::{LifecycleState, LifecycleStatus};
use crate::policies::BackoffPolicy;

/// Per-actor knobs, extracted from [`SchedulerConfig`](crate::SchedulerConfig).
#[derive(Clone, Debug)]
pub(crate) struct MonitorActorParams {
    pub pending_poll: Duration,
    pub backoff: BackoffPolicy,
    pub fence_on_fatal: bool,
}

/// Why an actor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActorExitReason {
    /// Destroy completed.
    Retired,
    /// A fatal engine error stopped cranking.
    Fenced,
    /// Runtime shutdown or explicit removal.
    Cancelled,
}

/// A crank that did not produce a status.
enum CrankFailure {
    Engine(LifecycleError),
    Panicked(String),
}

impl CrankFailure {
    fn reason(&self) -> String {
        match self {
            CrankFailure::Engine(e) => e.to_string(),
            CrankFailure::Panicked(info) => format!("crank panicked: {info}"),
        }
    }
}

pub(crate) struct MonitorActor {
    monitor: MonitorRef,
    params: MonitorActorParams,
    bus: Bus,
    semaphore: Option<Arc<Semaphore>>,
}

impl MonitorActor {
    pub(crate) fn new(
        bus: Bus,
        monitor: MonitorRef,
        params: MonitorActorParams,
        semaphore: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            monitor,
            params,
            bus,
            semaphore,
        }
    }

    /// Runs until the object retires, is fenced, or `token` is cancelled.
    pub(crate) async fn run(self, token: CancellationToken) -> ActorExitReason {
        let wake = self.monitor.wakeup();
        let mut last_state = self.monitor.state().ok();
        let mut failures: u32 = 0;

        loop {
            if token.is_cancelled() {
                return ActorExitReason::Cancelled;
            }
            let permit = match &self.semaphore {
                Some(sem) => {
                    select! {
                        res = sem.clone().acquire_owned() => match res {
                            Ok(permit) => Some(permit),
                            Err(_closed) => return ActorExitReason::Cancelled,
                        },
                        _ = token.cancelled() => return ActorExitReason::Cancelled,
                    }
                }
                None => None,
            };

            let res = self.crank_once();
            drop(permit);
            self.publish_state_change(&mut last_state);

            let wait = match res {
                Ok(status) => {
                    failures = 0;
                    if self.monitor.is_retired() {
                        self.publish(EventKind::ObjectDestroyed);
                        return ActorExitReason::Retired;
                    }
                    match status {
                        LifecycleStatus::Continue => {
                            tokio::task::yield_now().await;
                            continue;
                        }
                        LifecycleStatus::Reschedule(ms) => Duration::from_millis(u64::from(ms)),
                        LifecycleStatus::Pending | LifecycleStatus::Done => self.params.pending_poll,
                    }
                }
                Err(CrankFailure::Engine(LifecycleError::Destroyed { .. })) => {
                    self.publish(EventKind::ObjectDestroyed);
                    return ActorExitReason::Retired;
                }
                Err(failure) => {
                    failures = failures.saturating_add(1);
                    match self.on_failure(&failure, failures) {
                        Some(delay) => delay,
                        None => return ActorExitReason::Fenced,
                    }
                }
            };

            select! {
                _ = time::sleep(wait) => {}
                _ = wake.notified() => {}
                _ = token.cancelled() => return ActorExitReason::Cancelled,
            }
        }
    }

    fn crank_once(&self) -> Result<LifecycleStatus, CrankFailure> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.monitor.crank())) {
            Ok(res) => res.map_err(CrankFailure::Engine),
            Err(panic) => {
                let info = panic_message(&*panic);
                tracing::error!(object = %self.monitor.object_id(), panic = %info, "crank panicked");
                Err(CrankFailure::Panicked(info))
            }
        }
    }

    /// Publishes the failure; returns the retry delay, or `None` if the object is fenced.
    fn on_failure(&self, failure: &CrankFailure, failures: u32) -> Option<Duration> {
        let fence_label = match failure {
            CrankFailure::Engine(e) if self.params.fence_on_fatal && e.is_fatal() => {
                Some(e.as_label())
            }
            _ => None,
        };
        let ev = Event::new(EventKind::CrankFailed)
            .with_source(self.monitor.as_ref())
            .with_attempt(failures)
            .with_reason(failure.reason());

        if let Some(label) = fence_label {
            self.bus.publish(ev);
            self.bus.publish(
                Event::new(EventKind::ObjectFenced)
                    .with_source(self.monitor.as_ref())
                    .with_reason(label),
            );
            return None;
        }

        let delay = self.params.backoff.delay_after(failures);
        self.bus.publish(ev.with_delay(delay));
        Some(delay)
    }

    fn publish_state_change(&self, last: &mut Option<LifecycleState>) {
        let Ok(now) = self.monitor.state() else {
            return;
        };
        match *last {
            Some(old) if old != now => {
                self.bus.publish(
                    Event::new(EventKind::StateChanged)
                        .with_source(self.monitor.as_ref())
                        .with_transition(old, now),
                );
            }
            Some(_) => {}
            None => {
                self.bus.publish(
                    Event::new(EventKind::StateChanged)
                        .with_source(self.monitor.as_ref())
                        .with_state(now),
                );
            }
        }
        *last = Some(now);
    }

    fn publish(&self, kind: EventKind) {
        self.bus
            .publish(Event::new(kind).with_source(self.monitor.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::ClassMonitor;
    use crate::lifecycle::LifecycleObject;
    use crate::lifecycle::fixture::{self, Tracked};

    fn params(fence_on_fatal: bool) -> MonitorActorParams {
        MonitorActorParams {
            pending_poll: Duration::from_secs(3),
            backoff: BackoffPolicy::default(),
            fence_on_fatal,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_retires_actor() {
        let fx = fixture::build();
        let obj = Arc::new(Tracked::new(1, &fx.leaf));
        fx.leaf
            .set_state(&obj, LifecycleState::PendingDestroy)
            .unwrap();

        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let m = ClassMonitor::with_default_packet(fx.leaf.clone(), obj);
        let actor = MonitorActor::new(bus, m, params(true), None);

        assert_eq!(
            actor.run(CancellationToken::new()).await,
            ActorExitReason::Retired
        );
        let kinds: Vec<_> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::StateChanged, EventKind::ObjectDestroyed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_fences() {
        let fx = fixture::build();
        let mut obj = Tracked::new(2, &fx.leaf);
        obj.corrupt();

        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let m = ClassMonitor::with_default_packet(fx.leaf.clone(), Arc::new(obj));
        let actor = MonitorActor::new(bus, m, params(true), None);

        assert_eq!(
            actor.run(CancellationToken::new()).await,
            ActorExitReason::Fenced
        );
        let evs = drain(&mut rx);
        assert_eq!(evs[0].kind, EventKind::CrankFailed);
        assert_eq!(evs[0].attempt, Some(1));
        assert_eq!(evs[0].delay_ms, None);
        assert_eq!(evs[1].kind, EventKind::ObjectFenced);
        assert_eq!(evs[1].reason.as_deref(), Some("lifecycle_corrupted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_until_cancelled() {
        let fx = fixture::build();
        let mut obj = Tracked::new(3, &fx.leaf);
        obj.corrupt();

        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let m = ClassMonitor::with_default_packet(fx.leaf.clone(), Arc::new(obj));
        let actor = MonitorActor::new(bus, m, params(false), None);
        let token = CancellationToken::new();
        let join = tokio::spawn(actor.run(token.clone()));

        // default backoff: 100ms, then 200ms
        time::sleep(Duration::from_millis(250)).await;
        token.cancel();
        assert_eq!(join.await.unwrap(), ActorExitReason::Cancelled);

        let failed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.kind == EventKind::CrankFailed)
            .map(|e| (e.attempt, e.delay_ms))
            .collect();
        assert_eq!(failed, vec![(Some(1), Some(100)), (Some(2), Some(200))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wakeup_ends_wait_early() {
        let fx = fixture::build();
        let obj = Arc::new(Tracked::new(4, &fx.leaf));
        fx.leaf.set_state(&obj, LifecycleState::Ready).unwrap();

        let bus = Bus::new(64);
        let m = ClassMonitor::with_default_packet(fx.leaf.clone(), obj.clone());
        let actor = MonitorActor::new(bus, m, params(true), None);
        let token = CancellationToken::new();
        let join = tokio::spawn(actor.run(token.clone()));

        time::sleep(Duration::from_millis(10)).await;
        obj.clear_log();
        fx.leaf.set_cond(&obj, fixture::B).unwrap();
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(obj.runs("leaf.b"), 1);

        token.cancel();
        assert_eq!(join.await.unwrap(), ActorExitReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_permit() {
        let fx = fixture::build();
        let obj = Arc::new(Tracked::new(5, &fx.leaf));
        let sem = Arc::new(Semaphore::new(1));
        let _held = sem.clone().acquire_owned().await.unwrap();

        let m = ClassMonitor::with_default_packet(fx.leaf.clone(), obj.clone());
        let actor = MonitorActor::new(Bus::new(8), m, params(true), Some(sem));
        let token = CancellationToken::new();
        let join = tokio::spawn(actor.run(token.clone()));

        time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        assert_eq!(join.await.unwrap(), ActorExitReason::Cancelled);
        assert_eq!(obj.lifecycle().crank_count(), 0);
    }
}
