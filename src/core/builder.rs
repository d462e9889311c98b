use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::actor::MonitorActorParams;
use super::registry::Registry;
use super::scheduler::Scheduler;
use crate::config::SchedulerConfig;
use crate::events::Bus;
use crate::subscribers::{StateTracker, Subscribe, SubscriberSet};

/// Builder for a [`Scheduler`].
pub struct SchedulerBuilder {
    cfg: SchedulerConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SchedulerBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers.
    ///
    /// Each receives scheduler events through its own bounded queue. A
    /// [`StateTracker`] is always added; reach it through [`Scheduler::tracker`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the scheduler and starts its background listeners.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<Scheduler> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let runtime_token = CancellationToken::new();

        let tracker = Arc::new(StateTracker::new());
        let mut subscribers = self.subscribers;
        subscribers.push(tracker.clone());
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));

        let semaphore = self
            .cfg
            .concurrency_limit()
            .map(Semaphore::new)
            .map(Arc::new);

        let registry = Registry::new(
            bus.clone(),
            runtime_token.clone(),
            semaphore,
            MonitorActorParams {
                pending_poll: self.cfg.pending_poll,
                backoff: self.cfg.backoff,
                fence_on_fatal: self.cfg.fence_on_fatal,
            },
        );
        registry.clone().spawn_listener();

        Arc::new(Scheduler::new_internal(
            self.cfg,
            bus,
            subs,
            tracker,
            registry,
            runtime_token,
        ))
    }
}
