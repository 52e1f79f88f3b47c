//! Tasks: wait for the group's monitor, then race through a checkout pipeline.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::STOCK_POLL_INTERVAL;
use crate::models::StockInfo;

use super::cancel::sleep_or_cancel;
use super::group::{StockSlot, TaskGroup};
use super::step::{run_pipeline, PipelineOutcome, RunContext, TaskFunction};

/// Builds the retailer-specific checkout pipeline for discovered stock.
pub trait CheckoutFlow: Send + Sync {
    fn pipeline(&self, stock: &StockInfo) -> Vec<TaskFunction>;
}

impl<F> CheckoutFlow for F
where
    F: Fn(&StockInfo) -> Vec<TaskFunction> + Send + Sync,
{
    fn pipeline(&self, stock: &StockInfo) -> Vec<TaskFunction> {
        self(stock)
    }
}

/// A task definition.
#[derive(Clone)]
pub struct Task {
    flow: Arc<dyn CheckoutFlow>,
}

impl Task {
    pub fn new(flow: Arc<dyn CheckoutFlow>) -> Self {
        Self { flow }
    }

    /// Waits for stock, then runs the checkout pipeline built for it.
    pub async fn run(&self, group: &TaskGroup, run: &RunContext) -> PipelineOutcome {
        run.reporter.start("Starting");
        run.reporter.update("Waiting for monitor");

        let Some(stock) = wait_for_monitor(group.stock(), &run.cancel).await else {
            return run.cancelled();
        };
        log::info!(
            "[{}] unblocked by {} ({})",
            run.reporter.worker(),
            stock.identifier,
            stock.product.name
        );
        run.reporter.update(format!("Found {}", stock.product.name));

        let steps = self.flow.pipeline(&stock);
        let outcome = run_pipeline(&steps, run).await;
        if outcome == PipelineOutcome::Completed {
            run.reporter.complete("Checked out");
        }
        outcome
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Polls `slot` every [`STOCK_POLL_INTERVAL`] until it holds stock.
///
/// `None` if cancelled first.
pub async fn wait_for_monitor(slot: &StockSlot, cancel: &CancellationToken) -> Option<StockInfo> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(stock) = slot.current() {
            return Some(stock);
        }
        if !sleep_or_cancel(cancel, STOCK_POLL_INTERVAL).await {
            return None;
        }
    }
}
