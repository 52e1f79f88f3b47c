//! Event bus.
//!
//! This module provides:
//! - `Event`: monitor/task status changes and management-client notifications
//! - `EventBus`: fan-out to any number of subscribers, each with its own channel
//! - `Subscription`: a receiver handle that unsubscribes when dropped
//!
//! Events are the only way the engine reports to the outside; there is no
//! separate error channel.

mod bus;
mod types;

// Re-export public API
pub use bus::{EventBus, Subscription};
pub use types::{Event, EventKind, StatusEvent};
