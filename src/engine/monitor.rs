//! Monitors: poll tracked identifiers and hand discovered stock to the group.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ProductInfo, StockInfo};

use super::cancel::sleep_or_cancel;
use super::group::TaskGroup;
use super::step::{PipelineOutcome, RunContext, StepContext};

/// Retailer-specific availability check.
#[async_trait]
pub trait StockProbe: Send + Sync {
    /// Returns the product when `identifier` is in stock, `None` when it is not.
    async fn probe(&self, identifier: &str, ctx: &StepContext) -> anyhow::Result<Option<ProductInfo>>;
}

/// A monitor definition: what to track and how to check it.
#[derive(Clone)]
pub struct Monitor {
    identifiers: Vec<String>,
    probe: Arc<dyn StockProbe>,
}

impl Monitor {
    pub fn new<I, S>(identifiers: I, probe: Arc<dyn StockProbe>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            probe,
        }
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Polls until cancelled.
    ///
    /// Each identifier is reported once per in-stock episode: a repeat sighting
    /// is ignored until the identifier is seen out of stock (or over the price
    /// ceiling) again. Group settings are re-read every cycle.
    pub async fn run(&self, group: &TaskGroup, run: &RunContext) -> PipelineOutcome {
        let reporter = &run.reporter;
        let mut reported: HashSet<String> = HashSet::new();
        let mut cycle: u32 = 0;

        reporter.start("Monitoring");
        loop {
            if run.cancel.is_cancelled() {
                return run.cancelled();
            }
            cycle += 1;
            let config = group.config();
            let ctx = run.step_context(cycle);

            for identifier in &self.identifiers {
                if run.cancel.is_cancelled() {
                    break;
                }
                match self.probe.probe(identifier, &ctx).await {
                    Ok(Some(product)) if product.within_ceiling(config.price_ceiling) => {
                        if reported.insert(identifier.clone()) {
                            log::info!(
                                "[{}] {} in stock ({})",
                                reporter.worker(),
                                identifier,
                                product.name
                            );
                            reporter.found(format!("Found {}", product.name), product.clone());
                            group
                                .stock()
                                .publish(StockInfo::discovered(identifier.as_str(), product));
                        }
                    }
                    Ok(Some(product)) => {
                        log::debug!(
                            "[{}] {} over price ceiling ({:?} > {:?})",
                            reporter.worker(),
                            identifier,
                            product.price,
                            config.price_ceiling
                        );
                        self.mark_unavailable(identifier, &mut reported, group, run);
                    }
                    Ok(None) => self.mark_unavailable(identifier, &mut reported, group, run),
                    Err(e) => {
                        log::warn!("[{}] probe of {} failed: {e:#}", reporter.worker(), identifier);
                        reporter.update(format!("Monitor error: {e}"));
                    }
                }
            }

            if !sleep_or_cancel(&run.cancel, config.delay).await {
                return run.cancelled();
            }
        }
    }

    fn mark_unavailable(
        &self,
        identifier: &str,
        reported: &mut HashSet<String>,
        group: &TaskGroup,
        run: &RunContext,
    ) {
        if reported.remove(identifier) {
            group.stock().clear_if(identifier);
            run.reporter.update(format!("{identifier} out of stock"));
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("identifiers", &self.identifiers)
            .finish_non_exhaustive()
    }
}
