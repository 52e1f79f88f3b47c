//! Fan-out publish/subscribe hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc;

use super::Event;

type Sinks = RwLock<HashMap<u64, mpsc::UnboundedSender<Event>>>;

#[derive(Debug, Default)]
struct BusInner {
    sinks: Sinks,
    next_id: AtomicU64,
}

/// Broadcasts events to every live subscriber.
///
/// Each subscriber owns its own unbounded channel, so a slow observer never
/// blocks a publishing worker. Cloning the bus shares the subscriber list.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new sink.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        log::debug!("Event bus: subscriber {id} added");
        Subscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a sink. Nothing is delivered to it afterwards.
    ///
    /// Dropping the [`Subscription`] has the same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Delivers `event` to every current subscriber and returns how many got it.
    ///
    /// The sink list is snapshotted under the read lock; a sink whose receiver
    /// went away in the meantime just fails its send and is pruned.
    pub fn publish(&self, event: Event) -> usize {
        let snapshot: Vec<(u64, mpsc::UnboundedSender<Event>)> = self
            .inner
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut sinks = self
                .inner
                .sinks
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for id in dead {
                sinks.remove(&id);
            }
        }
        delivered
    }

    /// Number of registered sinks.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A registered sink. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Event>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Subscriber id, unique per bus.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Drains every queued event.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(bus) = self.bus.upgrade() {
            bus.sinks
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
            log::debug!("Event bus: subscriber {} removed", self.id);
        }
    }
}
