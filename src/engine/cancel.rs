//! Cooperative cancellation: external stop flags and the watcher that turns
//! them into a run's cancellation token.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::STOP_WATCH_INTERVAL;

/// Externally settable stop request for one worker.
///
/// The management layer (or the pipeline itself, on a terminal failure) sets
/// it; the run observes it only through its watcher.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Creates a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag before a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Polls a [`StopFlag`] and cancels a run's token once it is set.
///
/// The watcher task is aborted when this handle drops, so it never outlives
/// the run it belongs to.
#[derive(Debug)]
pub struct StopWatcher {
    handle: JoinHandle<()>,
}

impl StopWatcher {
    /// Watches `flag` every [`STOP_WATCH_INTERVAL`].
    pub fn spawn(flag: StopFlag, token: CancellationToken) -> Self {
        Self::spawn_with_interval(flag, token, STOP_WATCH_INTERVAL)
    }

    /// Watches `flag` at a custom interval.
    pub fn spawn_with_interval(
        flag: StopFlag,
        token: CancellationToken,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                if flag.is_set() {
                    token.cancel();
                    return;
                }
                if token.is_cancelled() {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Self { handle }
    }
}

impl Drop for StopWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// Returns `false` when cancelled.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
