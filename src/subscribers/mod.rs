//! # Event subscribers for the monitor scheduler.
//!
//! This module provides the [`Subscribe`] trait, the fan-out [`SubscriberSet`] and
//! built-in implementations for handling events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! MonitorActor ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//!                                                                        │
//!                                                   ┌────────────────────┼──────────┐
//!                                                   ▼                    ▼          ▼
//!                                              StateTracker          LogWriter    Custom
//! ```
//!
//! ## Subscriber types
//! - **Passive subscribers** observe and react to events (logging, alerts)
//! - **Stateful subscribers** maintain a view built from events ([`StateTracker`])

#[cfg(feature = "logging")]
mod log;
mod set;
mod state;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use state::StateTracker;
pub use subscribe::Subscribe;
