//! Scheduler events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Scheduler`, `Registry`, `MonitorActor`, `SubscriberSet`
//!   workers (overflow/panic).
//! - **Consumers**: the scheduler's subscriber listener (fans out to
//!   `SubscriberSet`) and the `Registry` listener.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
