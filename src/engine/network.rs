//! A worker's network handle: its transport plus the pool its proxy came from.

use std::sync::Arc;

use crate::error_handling::TransportError;
use crate::models::WorkerId;
use crate::proxy::{Proxy, ProxyPool};
use crate::transport::{Request, Response, Transport};

#[derive(Debug)]
pub struct WorkerNetwork {
    worker: WorkerId,
    transport: Transport,
    pool: Option<Arc<ProxyPool>>,
}

impl WorkerNetwork {
    pub fn new(worker: WorkerId, transport: Transport, pool: Option<Arc<ProxyPool>>) -> Self {
        Self {
            worker,
            transport,
            pool,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn pool(&self) -> Option<&Arc<ProxyPool>> {
        self.pool.as_ref()
    }

    /// Sends a request through the worker's transport.
    pub async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.transport.round_trip(request).await
    }

    /// Moves the worker to another proxy of its pool, discarding its transport cache.
    ///
    /// `None` when the worker has no pool or no longer holds an assignment.
    pub async fn rotate_proxy(&self) -> Option<Arc<Proxy>> {
        let pool = self.pool.as_ref()?;
        pool.rotate(&self.worker, &self.transport).await
    }
}
