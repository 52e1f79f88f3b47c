//! Event payloads published on the bus.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{GroupId, ProductInfo, WorkerId};

/// Lifecycle tag carried by every status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The worker started
    Start,
    /// Progress (new step, retry, stock found)
    Update,
    /// Terminal failure
    Fail,
    /// Stopped by request
    Stop,
    /// Pipeline completed
    Complete,
}

/// A monitor or task status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    /// Correlation id of the worker
    pub worker: WorkerId,
    /// Task group the worker belongs to
    pub group: GroupId,
    /// Lifecycle tag
    pub kind: EventKind,
    /// Human-readable status
    pub status: String,
    /// Product payload; set on stock-found events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductInfo>,
    /// When the event was created
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        worker: WorkerId,
        group: GroupId,
        kind: EventKind,
        status: impl Into<String>,
    ) -> Self {
        Self {
            worker,
            group,
            kind,
            status: status.into(),
            product: None,
            at: Utc::now(),
        }
    }

    /// Attaches a product payload.
    pub fn with_product(mut self, product: ProductInfo) -> Self {
        self.product = Some(product);
        self
    }
}

/// Everything observers can receive. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Monitor status change
    Monitor(StatusEvent),
    /// Task status change
    Task(StatusEvent),
    /// A management client connected
    Connected {
        /// Client identifier
        client: String,
    },
    /// A management client disconnected
    Closed {
        /// Client identifier
        client: String,
    },
    /// A management client authenticated
    Authenticated {
        /// Client identifier
        client: String,
    },
}

impl Event {
    /// Status payload for monitor and task events.
    pub fn status(&self) -> Option<&StatusEvent> {
        match self {
            Event::Monitor(status) | Event::Task(status) => Some(status),
            _ => None,
        }
    }

    /// Worker the event correlates to.
    pub fn worker(&self) -> Option<&WorkerId> {
        self.status().map(|s| &s.worker)
    }

    /// Whether this is a monitor's stock-found event.
    pub fn is_stock_found(&self) -> bool {
        matches!(
            self,
            Event::Monitor(StatusEvent { kind: EventKind::Update, product: Some(_), .. })
        )
    }
}
