//! Task groups: the binding of monitors to tasks and the stock slot between them.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::config::DEFAULT_MONITOR_DELAY;
use crate::models::{GroupId, StockInfo};

/// Group settings editable by the management layer while workers run.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupConfig {
    /// Delay between monitor poll cycles and default step retry delay
    pub delay: Duration,
    /// Highest acceptable price; `None` accepts anything
    pub price_ceiling: Option<f64>,
    /// Name of the proxy pool workers draw from; `None` dials directly
    pub proxy_group: Option<String>,
    /// Checkout profile reference, opaque to the engine
    pub profile: Option<String>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_MONITOR_DELAY,
            price_ceiling: None,
            proxy_group: None,
            profile: None,
        }
    }
}

/// Single-writer, multi-reader slot for the current in-stock episode.
#[derive(Debug, Default)]
pub struct StockSlot {
    current: RwLock<Option<StockInfo>>,
}

impl StockSlot {
    /// Makes `stock` visible to waiting tasks.
    pub fn publish(&self, stock: StockInfo) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(stock);
    }

    /// Current stock, if any.
    pub fn current(&self) -> Option<StockInfo> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ends the episode if it is for `identifier`. Returns whether it cleared.
    pub fn clear_if(&self, identifier: &str) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|s| s.identifier == identifier) {
            *current = None;
            true
        } else {
            false
        }
    }

    /// Ends whatever episode is current.
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Monitors and tasks pursuing the same product.
#[derive(Debug)]
pub struct TaskGroup {
    id: GroupId,
    config: RwLock<GroupConfig>,
    stock: StockSlot,
}

impl TaskGroup {
    /// Creates an empty group with `config`.
    pub fn new(id: GroupId, config: GroupConfig) -> Self {
        Self {
            id,
            config: RwLock::new(config),
            stock: StockSlot::default(),
        }
    }

    /// Group id.
    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> GroupConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Edits the settings in place; running monitors pick them up next cycle.
    pub fn update_config(&self, edit: impl FnOnce(&mut GroupConfig)) {
        edit(&mut self.config.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// The group's shared stock slot.
    pub fn stock(&self) -> &StockSlot {
        &self.stock
    }
}
