//! Proxy pool: assignment, reassignment and release of proxies to workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::error_handling::ProxyError;
use crate::models::WorkerId;
use crate::transport::{dialer_for, Transport};

use super::Proxy;

/// How the pool picks a proxy for a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Cycle through the list in order
    #[default]
    RoundRobin,
    /// Uniformly random pick
    Random,
    /// Proxy with the lowest usage count (first in list on ties)
    LeastLoaded,
}

/// A named collection of proxies shared by the workers of one proxy group.
///
/// Every proxy's count equals the number of workers currently assigned to it,
/// so [`ProxyPool::total_load`] always equals the number of live assignments.
#[derive(Debug)]
pub struct ProxyPool {
    name: String,
    proxies: Vec<Arc<Proxy>>,
    policy: SelectionPolicy,
    cursor: AtomicUsize,
    assignments: Mutex<HashMap<WorkerId, Arc<Proxy>>>,
}

impl ProxyPool {
    /// Creates a pool from parsed proxies.
    pub fn new(name: impl Into<String>, proxies: Vec<Proxy>, policy: SelectionPolicy) -> Self {
        Self {
            name: name.into(),
            proxies: proxies.into_iter().map(Arc::new).collect(),
            policy,
            cursor: AtomicUsize::new(0),
            assignments: Mutex::new(HashMap::new()),
        }
    }

    /// Pool name (the proxy group name used by task groups).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every proxy in the pool.
    pub fn proxies(&self) -> &[Arc<Proxy>] {
        &self.proxies
    }

    /// Whether the pool has no proxies; workers then dial directly.
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Proxy currently assigned to `worker`.
    pub fn assigned(&self, worker: &WorkerId) -> Option<Arc<Proxy>> {
        self.lock().get(worker).cloned()
    }

    /// Number of workers holding an assignment.
    pub fn assigned_workers(&self) -> usize {
        self.lock().len()
    }

    /// Sum of every proxy's count.
    pub fn total_load(&self) -> i64 {
        self.proxies.iter().map(|p| p.count()).sum()
    }

    /// Selects a proxy for `worker` and increments its count.
    ///
    /// A worker that already holds an assignment keeps it. Returns `None` for an
    /// empty pool.
    pub fn assign(&self, worker: &WorkerId) -> Option<Arc<Proxy>> {
        let mut assignments = self.lock();
        if let Some(existing) = assignments.get(worker) {
            return Some(Arc::clone(existing));
        }
        let proxy = self.select(None)?;
        let count = proxy.acquire();
        log::debug!(
            "Pool {}: assigned {} to {} (count {})",
            self.name,
            proxy,
            worker,
            count
        );
        assignments.insert(worker.clone(), Arc::clone(&proxy));
        Some(proxy)
    }

    /// Moves `worker` onto `proxy` and rebinds its transport.
    ///
    /// The old proxy's count is decremented, the new one's incremented, and the
    /// worker's transport cache is discarded wholesale. `proxy` must belong to
    /// this pool and `worker` must hold an assignment; otherwise nothing changes.
    pub async fn reassign(
        &self,
        worker: &WorkerId,
        proxy: Arc<Proxy>,
        transport: &Transport,
    ) -> Result<Arc<Proxy>, ProxyError> {
        if !self.proxies.iter().any(|p| Arc::ptr_eq(p, &proxy)) {
            return Err(ProxyError::ForeignProxy {
                proxy: proxy.to_string(),
                pool: self.name.clone(),
            });
        }
        let next = self.move_assignment(worker, |_| proxy)?;
        transport.rebind(dialer_for(Some(Arc::clone(&next)))).await;
        Ok(next)
    }

    /// Picks a different proxy by policy and reassigns `worker` to it.
    ///
    /// Returns the new proxy, or `None` when the worker holds no assignment
    /// (never assigned, or already released).
    pub async fn rotate(&self, worker: &WorkerId, transport: &Transport) -> Option<Arc<Proxy>> {
        let next = self
            .move_assignment(worker, |current| {
                self.select(Some(current))
                    .unwrap_or_else(|| Arc::clone(current))
            })
            .ok()?;
        transport.rebind(dialer_for(Some(Arc::clone(&next)))).await;
        Some(next)
    }

    /// Forgets `worker`'s assignment and decrements its proxy's count.
    pub fn release(&self, worker: &WorkerId) -> Option<Arc<Proxy>> {
        let released = self.lock().remove(worker);
        if let Some(proxy) = &released {
            let count = proxy.release();
            log::debug!(
                "Pool {}: released {} from {} (count {})",
                self.name,
                proxy,
                worker,
                count
            );
        }
        released
    }

    /// Swaps `worker`'s proxy for the one `pick` returns, under the assignment lock.
    fn move_assignment(
        &self,
        worker: &WorkerId,
        pick: impl FnOnce(&Arc<Proxy>) -> Arc<Proxy>,
    ) -> Result<Arc<Proxy>, ProxyError> {
        let mut assignments = self.lock();
        let Some(current) = assignments.get(worker).cloned() else {
            return Err(ProxyError::NotAssigned {
                worker: worker.to_string(),
                pool: self.name.clone(),
            });
        };
        let next = pick(&current);
        next.acquire();
        current.release();
        assignments.insert(worker.clone(), Arc::clone(&next));
        log::info!(
            "Pool {}: moved {} from {} to {}",
            self.name,
            worker,
            current,
            next
        );
        Ok(next)
    }

    fn select(&self, avoid: Option<&Arc<Proxy>>) -> Option<Arc<Proxy>> {
        let len = self.proxies.len();
        if len == 0 {
            return None;
        }
        let is_avoided = |p: &Arc<Proxy>| avoid.is_some_and(|a| Arc::ptr_eq(a, p));
        let index = match self.policy {
            SelectionPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % len,
            SelectionPolicy::Random => rand::rng().random_range(0..len),
            SelectionPolicy::LeastLoaded => self
                .proxies
                .iter()
                .enumerate()
                .filter(|(_, p)| !is_avoided(*p))
                .min_by_key(|(_, p)| p.count())
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        if len > 1 && is_avoided(&self.proxies[index]) {
            return Some(Arc::clone(&self.proxies[(index + 1) % len]));
        }
        Some(Arc::clone(&self.proxies[index]))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerId, Arc<Proxy>>> {
        self.assignments.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
