//! Background refresh loops (session keepalive, periodic re-authentication).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::REFRESH_RESTART_DELAY;
use crate::models::WorkerId;

use super::cancel::{panic_message, sleep_or_cancel};
use super::network::WorkerNetwork;
use super::step::{StepContext, TaskFunction};

/// Repeats `step` every `every` until `cancel` fires.
///
/// Each run starts `every` after the previous one started (or immediately if it
/// overran). Failures are logged and the loop continues; a panic is caught and
/// the loop restarts after [`REFRESH_RESTART_DELAY`].
pub(crate) fn spawn_refresh(
    step: TaskFunction,
    every: Duration,
    worker: WorkerId,
    network: Arc<WorkerNetwork>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut run: u32 = 0;
        while !cancel.is_cancelled() {
            run += 1;
            let started = Instant::now();
            let ctx = StepContext {
                worker: worker.clone(),
                attempt: run,
                cancel: cancel.clone(),
                network: Arc::clone(&network),
            };

            let pause = match AssertUnwindSafe(async { step.invoke(ctx).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(_)) => every.saturating_sub(started.elapsed()),
                Ok(Err(e)) => {
                    log::warn!("[{worker}] {} refresh failed: {e}", step.name());
                    every.saturating_sub(started.elapsed())
                }
                Err(payload) => {
                    log::error!(
                        "[{worker}] {} refresh panicked, restarting: {}",
                        step.name(),
                        panic_message(payload.as_ref())
                    );
                    REFRESH_RESTART_DELAY
                }
            };

            if !sleep_or_cancel(&cancel, pause).await {
                break;
            }
        }
        log::debug!("[{worker}] {} refresh stopped", step.name());
    })
}
