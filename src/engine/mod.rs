//! Orchestration engine.
//!
//! This module provides:
//! - `StopFlag` and the stop watcher: cooperative, polled cancellation
//! - `TaskFunction` and `run_pipeline`: ordered, retryable, cancellable steps
//!   with background refresh loops
//! - `Monitor` / `Task`: the stock handoff through a `TaskGroup`'s stock slot
//! - Challenge polling helpers for antibot collaborators
//! - `Engine`: registry of groups and workers with start/stop/status accessors
//!
//! Every worker runs as its own tokio task with its own transport. Workers only
//! share the proxy pools, the event bus and their group's stock slot.

mod cancel;
mod challenge;
mod group;
mod monitor;
mod network;
mod refresh;
mod reporter;
mod step;
mod task;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error_handling::EngineError;
use crate::events::EventBus;
use crate::models::{GroupId, WorkerId};
use crate::proxy::{Proxy, ProxyPool};
use crate::transport::{dialer_for, ClientIdentity, Transport, TransportOptions};

// Re-export public API
pub use cancel::{sleep_or_cancel, StopFlag, StopWatcher};
pub use challenge::{poll_for_token, verify_with_retries, Verification};
pub use group::{GroupConfig, StockSlot, TaskGroup};
pub use monitor::{Monitor, StockProbe};
pub use network::WorkerNetwork;
pub use reporter::{Reporter, WorkerRole, WorkerStatus};
pub use step::{
    run_pipeline, PipelineOutcome, RunContext, StepContext, StepKind, StepResult, TaskFunction,
};
pub use task::{wait_for_monitor, CheckoutFlow, Task};

use cancel::panic_message;

#[derive(Debug, Clone)]
enum Job {
    Monitor(Monitor),
    Task(Task),
}

impl Job {
    fn role(&self) -> WorkerRole {
        match self {
            Job::Monitor(_) => WorkerRole::Monitor,
            Job::Task(_) => WorkerRole::Task,
        }
    }

    async fn run(&self, group: &TaskGroup, run: &RunContext) -> PipelineOutcome {
        match self {
            Job::Monitor(monitor) => monitor.run(group, run).await,
            Job::Task(task) => task.run(group, run).await,
        }
    }
}

#[derive(Debug)]
struct WorkerEntry {
    group: Arc<TaskGroup>,
    identity: ClientIdentity,
    job: Job,
    reporter: Arc<Reporter>,
    stop: StopFlag,
    running: Mutex<Option<RunningWorker>>,
}

#[derive(Debug)]
struct RunningWorker {
    handle: JoinHandle<PipelineOutcome>,
    network: Arc<WorkerNetwork>,
}

/// Registry of task groups, proxy pools and workers.
///
/// The management layer configures it through these accessors and observes it
/// only through [`Engine::bus`] subscriptions.
#[derive(Debug, Default)]
pub struct Engine {
    bus: EventBus,
    transport_options: TransportOptions,
    pools: RwLock<HashMap<String, Arc<ProxyPool>>>,
    groups: RwLock<HashMap<GroupId, Arc<TaskGroup>>>,
    workers: RwLock<HashMap<WorkerId, Arc<WorkerEntry>>>,
}

impl Engine {
    /// Creates an engine publishing on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            ..Default::default()
        }
    }

    /// Sets the options every worker transport is created with.
    pub fn with_transport_options(mut self, options: TransportOptions) -> Self {
        self.transport_options = options;
        self
    }

    /// Bus every worker publishes status updates to.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Registers a proxy pool under its name, replacing any pool of that name.
    pub fn add_proxy_pool(&self, pool: ProxyPool) -> Arc<ProxyPool> {
        let pool = Arc::new(pool);
        write(&self.pools).insert(pool.name().to_string(), Arc::clone(&pool));
        pool
    }

    /// Looks up a registered pool by name.
    pub fn proxy_pool(&self, name: &str) -> Option<Arc<ProxyPool>> {
        read(&self.pools).get(name).cloned()
    }

    /// Registers a new group. Fails if the id is taken.
    pub fn create_group(
        &self,
        id: GroupId,
        config: GroupConfig,
    ) -> Result<Arc<TaskGroup>, EngineError> {
        let mut groups = write(&self.groups);
        if groups.contains_key(&id) {
            return Err(EngineError::DuplicateGroup(id.to_string()));
        }
        let group = Arc::new(TaskGroup::new(id.clone(), config));
        groups.insert(id, Arc::clone(&group));
        Ok(group)
    }

    /// Looks up a group.
    pub fn group(&self, id: &GroupId) -> Result<Arc<TaskGroup>, EngineError> {
        read(&self.groups)
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownGroup(id.to_string()))
    }

    /// Edits a group's settings; running monitors see them on their next cycle.
    pub fn update_group(
        &self,
        id: &GroupId,
        edit: impl FnOnce(&mut GroupConfig),
    ) -> Result<(), EngineError> {
        self.group(id)?.update_config(edit);
        Ok(())
    }

    /// Registers a monitor in `group` without starting it.
    pub fn add_monitor(
        &self,
        id: WorkerId,
        group: &GroupId,
        identity: ClientIdentity,
        monitor: Monitor,
    ) -> Result<(), EngineError> {
        self.add_worker(id, group, identity, Job::Monitor(monitor))
    }

    /// Registers a task in `group` without starting it.
    pub fn add_task(
        &self,
        id: WorkerId,
        group: &GroupId,
        identity: ClientIdentity,
        task: Task,
    ) -> Result<(), EngineError> {
        self.add_worker(id, group, identity, Job::Task(task))
    }

    /// Stops (if needed) and forgets a worker.
    pub fn remove(&self, id: &WorkerId) -> Result<(), EngineError> {
        let entry = write(&self.workers)
            .remove(id)
            .ok_or_else(|| EngineError::UnknownWorker(id.to_string()))?;
        entry.stop.request_stop();
        Ok(())
    }

    /// Ids of every registered worker in a group.
    pub fn workers_in(&self, group: &GroupId) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = read(&self.workers)
            .iter()
            .filter(|(_, entry)| entry.group.id() == group)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Starts a worker's run.
    ///
    /// The worker gets a fresh transport, bound to a proxy from its group's
    /// pool when the group names one. The proxy is released when the run ends.
    pub fn start(&self, id: &WorkerId) -> Result<(), EngineError> {
        let entry = self.entry(id)?;
        let mut running = lock(&entry.running);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(EngineError::AlreadyRunning(id.to_string()));
        }

        let config = entry.group.config();
        let pool = match &config.proxy_group {
            Some(name) => Some(
                self.proxy_pool(name)
                    .ok_or_else(|| EngineError::UnknownProxyGroup(name.clone()))?,
            ),
            None => None,
        };
        let proxy = pool.as_ref().and_then(|p| p.assign(id));
        let transport = match Transport::new(
            entry.identity.clone(),
            dialer_for(proxy),
            self.transport_options.clone(),
        ) {
            Ok(transport) => transport,
            Err(e) => {
                if let Some(pool) = &pool {
                    pool.release(id);
                }
                return Err(e.into());
            }
        };
        let network = Arc::new(WorkerNetwork::new(id.clone(), transport, pool.clone()));

        entry.stop.reset();
        let cancel = CancellationToken::new();
        let run = RunContext {
            reporter: Arc::clone(&entry.reporter),
            stop: entry.stop.clone(),
            cancel: cancel.clone(),
            network: Arc::clone(&network),
            default_delay: config.delay,
        };

        log::info!(
            "Starting {:?} {} in group {} as {}",
            entry.job.role(),
            id,
            entry.group.id(),
            entry.identity.label()
        );

        let worker = id.clone();
        let job = entry.job.clone();
        let group = Arc::clone(&entry.group);
        let handle = tokio::spawn(async move {
            let _watcher = StopWatcher::spawn(run.stop.clone(), cancel.clone());
            let outcome = match AssertUnwindSafe(job.run(&group, &run)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("{worker} crashed: {message}");
                    run.stop.request_stop();
                    run.reporter.fail(format!("Crashed: {message}"));
                    PipelineOutcome::Failed(message)
                }
            };
            cancel.cancel();
            if let Some(pool) = &pool {
                pool.release(&worker);
            }
            log::info!("{worker} finished: {outcome:?}");
            outcome
        });

        *running = Some(RunningWorker { handle, network });
        Ok(())
    }

    /// Starts every registered worker that is not running.
    pub fn start_all(&self) -> Result<(), EngineError> {
        let ids: Vec<WorkerId> = read(&self.workers).keys().cloned().collect();
        for id in ids {
            if !self.is_running(&id) {
                self.start(&id)?;
            }
        }
        Ok(())
    }

    /// Requests a worker to stop; it exits at its next cancellation check.
    pub fn stop(&self, id: &WorkerId) -> Result<(), EngineError> {
        self.entry(id)?.stop.request_stop();
        Ok(())
    }

    /// Requests every worker to stop.
    pub fn stop_all(&self) {
        for entry in read(&self.workers).values() {
            entry.stop.request_stop();
        }
    }

    /// True while the worker's pipeline is live.
    pub fn is_running(&self, id: &WorkerId) -> bool {
        self.entry(id).is_ok_and(|entry| {
            lock(&entry.running)
                .as_ref()
                .is_some_and(|r| !r.handle.is_finished())
        })
    }

    /// Last status a worker reported.
    pub fn status(&self, id: &WorkerId) -> Result<WorkerStatus, EngineError> {
        Ok(self.entry(id)?.reporter.last())
    }

    /// Waits for a worker's current run to end.
    ///
    /// `None` if the worker was never started or was already joined.
    pub async fn join(&self, id: &WorkerId) -> Result<Option<PipelineOutcome>, EngineError> {
        let entry = self.entry(id)?;
        let handle = lock(&entry.running).take().map(|r| r.handle);
        match handle {
            Some(handle) => Ok(Some(handle.await.unwrap_or_else(|e| {
                log::error!("{id} run aborted: {e}");
                PipelineOutcome::Failed(e.to_string())
            }))),
            None => Ok(None),
        }
    }

    /// Moves a running worker to another proxy of its pool.
    ///
    /// `Ok(None)` when the worker has no pool or has already released its proxy.
    pub async fn rotate_proxy(&self, id: &WorkerId) -> Result<Option<Arc<Proxy>>, EngineError> {
        let network = {
            let entry = self.entry(id)?;
            let running = lock(&entry.running);
            match running.as_ref() {
                Some(r) if !r.handle.is_finished() => Arc::clone(&r.network),
                _ => return Err(EngineError::NotRunning(id.to_string())),
            }
        };
        Ok(network.rotate_proxy().await)
    }

    fn add_worker(
        &self,
        id: WorkerId,
        group: &GroupId,
        identity: ClientIdentity,
        job: Job,
    ) -> Result<(), EngineError> {
        let group = self.group(group)?;
        let mut workers = write(&self.workers);
        if workers.contains_key(&id) {
            return Err(EngineError::DuplicateWorker(id.to_string()));
        }
        let reporter = Arc::new(Reporter::new(
            id.clone(),
            group.id().clone(),
            job.role(),
            self.bus.clone(),
        ));
        workers.insert(
            id,
            Arc::new(WorkerEntry {
                group,
                identity,
                job,
                reporter,
                stop: StopFlag::new(),
                running: Mutex::new(None),
            }),
        );
        Ok(())
    }

    fn entry(&self, id: &WorkerId) -> Result<Arc<WorkerEntry>, EngineError> {
        read(&self.workers)
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorker(id.to_string()))
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
