//! # LogWriter: event printer
//!
//! A minimal subscriber that forwards incoming [`Event`]s to `tracing`.
//! Failures, fencing and grace overruns go out at `warn`, everything else at `info`.
//!
//! ## Example output
//! ```text
//! INFO  object-added object=7 class=2 state=Some(Specialize)
//! INFO  state-changed object=7 old=Some(PendingReady) new=Some(Ready)
//! WARN  crank-failed object=7 attempt=Some(1) delay_ms=Some(100) reason=Some("...")
//! WARN  object-fenced object=7 reason=Some("null_cond_func")
//! INFO  shutdown-requested
//! INFO  all-stopped-within-grace
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let label = e.kind.as_label();
        let object = e.object.map(|o| o.0);
        match e.kind {
            EventKind::ShutdownRequested | EventKind::AllStoppedWithin => {
                info!("{label}");
            }
            EventKind::GraceExceeded => {
                warn!("{label}");
            }
            EventKind::StateChanged => {
                info!(object, old = ?e.old_state, new = ?e.new_state, "{label}");
            }
            EventKind::CrankFailed => {
                warn!(object, attempt = ?e.attempt, delay_ms = ?e.delay_ms, reason = ?e.reason, "{label}");
            }
            EventKind::ObjectFenced | EventKind::RequestRejected => {
                warn!(object, reason = ?e.reason, "{label}");
            }
            EventKind::ObjectAdded => {
                info!(object, class = ?e.class.map(|c| c.0), state = ?e.new_state, "{label}");
            }
            EventKind::ObjectDestroyed
            | EventKind::ObjectAddRequested
            | EventKind::ObjectRemoveRequested
            | EventKind::ObjectRemoved => {
                info!(object, "{label}");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                warn!(
                    subscriber = e.subscriber.unwrap_or("unknown"),
                    reason = e.reason.as_deref().unwrap_or("unknown"),
                    "{label}"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
