//! Pipeline steps and the retrying step executor.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error_handling::{StepError, TransportError};
use crate::models::WorkerId;
use crate::transport::{Request, Response, Transport};

use super::cancel::{sleep_or_cancel, StopFlag};
use super::network::WorkerNetwork;
use super::refresh::spawn_refresh;
use super::reporter::Reporter;

/// What a step returns: an optional success status to broadcast, or an error.
pub type StepResult = Result<Option<String>, StepError>;

type StepOp = Arc<dyn Fn(StepContext) -> BoxFuture<'static, StepResult> + Send + Sync>;

/// Everything a step invocation can reach.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Worker running the step
    pub worker: WorkerId,
    /// 1-based attempt number (run number for refresh steps, cycle for monitors)
    pub attempt: u32,
    /// The run's cancellation token; pass it into long polls
    pub cancel: CancellationToken,
    /// Transport and proxy pool of the worker
    pub network: Arc<WorkerNetwork>,
}

impl StepContext {
    /// The worker's fingerprinted transport.
    pub fn transport(&self) -> &Transport {
        self.network.transport()
    }

    /// Sends a request through the worker's transport.
    pub async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.network.send(request).await
    }

    /// Rotates the worker onto another proxy.
    pub async fn rotate_proxy(&self) -> bool {
        self.network.rotate_proxy().await.is_some()
    }
}

/// How the executor treats a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Run in order, retried on failure
    Standard,
    /// Launched as a background loop repeating every `every`
    Refresh {
        /// Period between run starts
        every: Duration,
    },
    /// Terminal checkout step; a decline is never retried
    Checkout,
}

/// A named pipeline step.
#[derive(Clone)]
pub struct TaskFunction {
    name: String,
    status: String,
    max_retries: u32,
    retry_delay: Option<Duration>,
    kind: StepKind,
    op: StepOp,
}

impl TaskFunction {
    /// Creates a standard step that retries until cancelled.
    pub fn new<F, Fut>(name: impl Into<String>, status: impl Into<String>, op: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            status: status.into(),
            max_retries: 0,
            retry_delay: None,
            kind: StepKind::Standard,
            op: Arc::new(move |ctx| op(ctx).boxed()),
        }
    }

    /// Caps retries; `0` retries until cancelled.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Overrides the worker's default delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Marks the step as a background refresh repeating every `every`.
    pub fn refresh_every(mut self, every: Duration) -> Self {
        self.kind = StepKind::Refresh { every };
        self
    }

    /// Marks the step as a checkout step.
    pub fn checkout(mut self) -> Self {
        self.kind = StepKind::Checkout;
        self
    }

    /// Step name shown in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Status text published when the step starts.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Attempts allowed before the step fails the pipeline.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// How the pipeline schedules this step.
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub(crate) fn invoke(&self, ctx: StepContext) -> BoxFuture<'static, StepResult> {
        (self.op)(ctx)
    }
}

impl fmt::Debug for TaskFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFunction")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// How a pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every step succeeded
    Completed,
    /// A step ran out of retries (or the run crashed)
    Failed(String),
    /// A checkout step was declined
    Declined(String),
    /// The run was cancelled
    Cancelled,
}

/// Per-run state shared by the executor, monitors and refresh loops.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Where status changes go
    pub reporter: Arc<Reporter>,
    /// The worker's external stop flag
    pub stop: StopFlag,
    /// This run's cancellation token
    pub cancel: CancellationToken,
    /// The worker's network handle
    pub network: Arc<WorkerNetwork>,
    /// Delay used by steps without their own
    pub default_delay: Duration,
}

impl RunContext {
    /// Builds the context for one step invocation.
    pub fn step_context(&self, attempt: u32) -> StepContext {
        StepContext {
            worker: self.reporter.worker().clone(),
            attempt,
            cancel: self.cancel.clone(),
            network: Arc::clone(&self.network),
        }
    }

    /// Marks the worker stopped and reports the cancellation.
    pub(crate) fn cancelled(&self) -> PipelineOutcome {
        self.stop.request_stop();
        self.reporter.stop("Stopped");
        PipelineOutcome::Cancelled
    }
}

/// Runs `steps` in order.
///
/// Refresh steps are launched as background loops tied to a child of the run's
/// token and stopped when the pipeline returns. A failure exhausting its retry
/// budget, a declined checkout, or cancellation sets the stop flag and aborts.
pub async fn run_pipeline(steps: &[TaskFunction], run: &RunContext) -> PipelineOutcome {
    let mut refreshers = Vec::new();

    for step in steps {
        if let StepKind::Refresh { every } = step.kind {
            let token = run.cancel.child_token();
            let worker = run.reporter.worker().clone();
            spawn_refresh(
                step.clone(),
                every,
                worker,
                Arc::clone(&run.network),
                token.clone(),
            );
            refreshers.push(token.drop_guard());
            continue;
        }

        if let Some(outcome) = run_step(step, run).await {
            return outcome;
        }
    }

    PipelineOutcome::Completed
}

/// Runs one step to success (`None`) or to a terminal outcome.
async fn run_step(step: &TaskFunction, run: &RunContext) -> Option<PipelineOutcome> {
    if run.cancel.is_cancelled() {
        return Some(run.cancelled());
    }
    run.reporter.update(step.status.as_str());

    let mut attempt: u32 = 1;
    loop {
        let err = match step.invoke(run.step_context(attempt)).await {
            Ok(status) => {
                if let Some(status) = status {
                    run.reporter.update(status);
                }
                return None;
            }
            Err(err) => err,
        };

        if run.cancel.is_cancelled() {
            return Some(run.cancelled());
        }

        if step.kind == StepKind::Checkout {
            if let StepError::Declined(reason) = &err {
                log::warn!("[{}] {} declined: {}", run.reporter.worker(), step.name, reason);
                run.stop.request_stop();
                run.reporter.fail(format!("{}: declined ({reason})", step.name));
                return Some(PipelineOutcome::Declined(reason.clone()));
            }
        }

        let retries_used = attempt - 1;
        if step.max_retries != 0 && retries_used >= step.max_retries {
            log::warn!(
                "[{}] {} failed after {} attempts: {}",
                run.reporter.worker(),
                step.name,
                attempt,
                err
            );
            run.stop.request_stop();
            run.reporter.fail(format!("{} failed: {err}", step.name));
            return Some(PipelineOutcome::Failed(err.to_string()));
        }

        log::debug!(
            "[{}] {} attempt {} failed: {}",
            run.reporter.worker(),
            step.name,
            attempt,
            err
        );
        let delay = step.retry_delay.unwrap_or(run.default_delay);
        if !sleep_or_cancel(&run.cancel, delay).await {
            return Some(run.cancelled());
        }

        attempt += 1;
        run.reporter
            .update(format!("{} (attempt {attempt})", step.status));
    }
}
