//! Status reporting from a worker to the event bus.

use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::events::{Event, EventBus, EventKind, StatusEvent};
use crate::models::{GroupId, ProductInfo, WorkerId};

/// Whether a worker monitors or checks out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    /// Polls for availability
    Monitor,
    /// Runs a checkout pipeline
    Task,
}

/// Last status a worker reported, for read access by the management layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    /// Lifecycle tag of the last event
    pub kind: EventKind,
    /// Last status string
    pub status: String,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            kind: EventKind::Stop,
            status: "Idle".to_string(),
        }
    }
}

/// Publishes a worker's status changes and remembers the latest one.
#[derive(Debug)]
pub struct Reporter {
    worker: WorkerId,
    group: GroupId,
    role: WorkerRole,
    bus: EventBus,
    last: RwLock<WorkerStatus>,
}

impl Reporter {
    /// Creates a reporter publishing to `bus` on behalf of `worker`.
    pub fn new(worker: WorkerId, group: GroupId, role: WorkerRole, bus: EventBus) -> Self {
        Self {
            worker,
            group,
            role,
            bus,
            last: RwLock::new(WorkerStatus::default()),
        }
    }

    /// Worker this reporter speaks for.
    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Group the worker belongs to.
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Monitor or task.
    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Latest reported status.
    pub fn last(&self) -> WorkerStatus {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes a `Start` update.
    pub fn start(&self, status: impl Into<String>) {
        self.emit(EventKind::Start, status.into(), None);
    }

    /// Publishes an `Update`.
    pub fn update(&self, status: impl Into<String>) {
        self.emit(EventKind::Update, status.into(), None);
    }

    /// Publishes a `Fail` update.
    pub fn fail(&self, status: impl Into<String>) {
        self.emit(EventKind::Fail, status.into(), None);
    }

    /// Publishes a `Stop` update.
    pub fn stop(&self, status: impl Into<String>) {
        self.emit(EventKind::Stop, status.into(), None);
    }

    /// Publishes a `Complete` update.
    pub fn complete(&self, status: impl Into<String>) {
        self.emit(EventKind::Complete, status.into(), None);
    }

    /// Publishes a stock-found update carrying the product.
    pub fn found(&self, status: impl Into<String>, product: ProductInfo) {
        self.emit(EventKind::Update, status.into(), Some(product));
    }

    fn emit(&self, kind: EventKind, status: String, product: Option<ProductInfo>) {
        log::debug!("[{}] {:?}: {}", self.worker, kind, status);
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = WorkerStatus {
            kind,
            status: status.clone(),
        };

        let mut event = StatusEvent::new(self.worker.clone(), self.group.clone(), kind, status);
        event.product = product;
        self.bus.publish(match self.role {
            WorkerRole::Monitor => Event::Monitor(event),
            WorkerRole::Task => Event::Task(event),
        });
    }
}
