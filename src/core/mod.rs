//! Monitor scheduler: the async driver around the lifecycle engine.
//!
//! The public API is [`Scheduler`] (built with [`SchedulerBuilder`]) and the
//! [`Monitor`] abstraction it drives, with [`ClassMonitor`] as the stock
//! implementation.
//!
//! Internal modules:
//! - [`scheduler`]: owns bus, subscribers and registry; handles shutdown;
//! - [`actor`]: cranks one object and turns outcomes into waits;
//! - [`registry`]: one actor per object, add/remove/cleanup through its command inbox;
//! - [`monitor`]: type-erased view of an object and its class;
//! - [`shutdown`]: termination signal handling.

mod actor;
mod builder;
mod monitor;
mod registry;
mod scheduler;
mod shutdown;

pub use builder::SchedulerBuilder;
pub use monitor::{ClassMonitor, Monitor, MonitorRef};
pub use scheduler::Scheduler;
