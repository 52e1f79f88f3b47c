//! stockrush library: concurrent monitor/task orchestration over a fingerprinted transport
//!
//! The crate is organized leaves first:
//! - [`transport`]: TLS handshakes impersonating a browser fingerprint, per-destination
//!   HTTP/1.1 vs HTTP/2 negotiation and caching, interception detection
//! - [`proxy`]: shared proxy pools with advisory usage counts
//! - [`events`]: fan-out of monitor/task status changes to observers
//! - [`engine`]: retryable step pipelines, cooperative cancellation and the
//!   monitor-to-task stock handoff
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stockrush::engine::{Engine, GroupConfig, Monitor, StepContext, StockProbe, Task, TaskFunction};
//! use stockrush::events::EventBus;
//! use stockrush::models::{ProductInfo, StockInfo};
//! use stockrush::transport::ClientIdentity;
//!
//! struct Probe;
//!
//! #[async_trait::async_trait]
//! impl StockProbe for Probe {
//!     async fn probe(&self, sku: &str, ctx: &StepContext) -> anyhow::Result<Option<ProductInfo>> {
//!         let url = format!("https://shop.example.com/api/stock/{sku}");
//!         let response = ctx.send(stockrush::transport::Request::get(&url)?).await?;
//!         Ok(response.status.is_success().then(|| ProductInfo::named(sku)))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EventBus::new());
//! engine.create_group("g1".into(), GroupConfig::default())?;
//! engine.add_monitor("m1".into(), &"g1".into(), ClientIdentity::chrome(),
//!     Monitor::new(["SKU-1"], Arc::new(Probe)))?;
//! let flow = |_: &StockInfo| vec![TaskFunction::new("Cart", "Adding to cart", |_ctx| async { Ok(None) })];
//! engine.add_task("t1".into(), &"g1".into(), ClientIdentity::firefox(), Task::new(Arc::new(flow)))?;
//! engine.start_all()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your application
//! or ensure you're calling library functions within an async context.

pub mod config;
pub mod engine;
mod error_handling;
pub mod events;
pub mod initialization;
pub mod models;
pub mod proxy;
pub mod transport;

// Re-export public API
pub use config::{Config, IdentityPreset, LogFormat, LogLevel};
pub use error_handling::{
    ChallengeError, EngineError, InitializationError, ProxyError, StepError, TransportError,
};
pub use run::{run_probe, ProbeReport, ProbeResult};

// Internal run module (one-shot fingerprinted requests for the CLI)
mod run {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use anyhow::{Context, Result};
    use futures::stream::FuturesUnordered;
    use futures::StreamExt;
    use log::{info, warn};

    use crate::config::Config;
    use crate::initialization::init_proxy_pool;
    use crate::models::WorkerId;
    use crate::proxy::SelectionPolicy;
    use crate::transport::{dialer_for, Protocol, Request, Transport, TransportOptions};

    /// Outcome of one probed URL.
    #[derive(Debug, Clone)]
    pub struct ProbeResult {
        /// URL as given
        pub url: String,
        /// Response status code, if a response arrived
        pub status: Option<u16>,
        /// Negotiated protocol, if a response arrived
        pub protocol: Option<Protocol>,
        /// Response body size in bytes
        pub body_bytes: usize,
        /// Error message, if the request failed
        pub error: Option<String>,
        /// Time taken for this URL
        pub elapsed: Duration,
    }

    /// Summary of a probe run.
    #[derive(Debug, Clone)]
    pub struct ProbeReport {
        /// Results in completion order
        pub results: Vec<ProbeResult>,
        /// Handshakes performed by the shared transport
        pub handshakes: usize,
        /// Proxy used, if any
        pub proxy: Option<String>,
        /// Total wall time in seconds
        pub elapsed_seconds: f64,
    }

    impl ProbeReport {
        /// Number of URLs that produced a response.
        pub fn successful(&self) -> usize {
            self.results.iter().filter(|r| r.status.is_some()).count()
        }
    }

    /// Issues one GET per configured URL through a single fingerprinted transport.
    ///
    /// URLs sharing a destination share one handshake. Individual request failures
    /// are reported in the result; only setup failures are returned as errors.
    pub async fn run_probe(config: Config) -> Result<ProbeReport> {
        let start = Instant::now();
        let worker = WorkerId::from("cli");

        let pool = match &config.proxies {
            Some(path) => Some(
                init_proxy_pool(path, "cli", SelectionPolicy::RoundRobin)
                    .await
                    .context("Failed to load proxy list")?,
            ),
            None => None,
        };
        let proxy = pool.as_ref().and_then(|p| p.assign(&worker));
        let proxy_label = proxy.as_ref().map(|p| p.to_string());

        let identity = config.identity.identity();
        info!("Probing {} URLs as {}", config.urls.len(), identity.label());
        let transport = Arc::new(
            Transport::new(
                identity,
                dialer_for(proxy),
                TransportOptions {
                    request_timeout: Duration::from_secs(config.timeout_seconds),
                    ..Default::default()
                },
            )
            .context("Failed to compile client identity")?,
        );

        let mut in_flight = FuturesUnordered::new();
        for url in config.urls {
            let transport = Arc::clone(&transport);
            in_flight.push(async move { probe_one(&transport, url).await });
        }

        let mut results = Vec::new();
        while let Some(result) = in_flight.next().await {
            results.push(result);
        }

        if let Some(pool) = &pool {
            pool.release(&worker);
        }

        Ok(ProbeReport {
            results,
            handshakes: transport.handshake_count(),
            proxy: proxy_label,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        })
    }

    async fn probe_one(transport: &Transport, url: String) -> ProbeResult {
        let started = Instant::now();
        let outcome = match Request::get(&url) {
            Ok(request) => transport.round_trip(request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(response) => ProbeResult {
                status: Some(response.status.as_u16()),
                protocol: Some(response.protocol),
                body_bytes: response.body.len(),
                error: None,
                elapsed: started.elapsed(),
                url,
            },
            Err(e) => {
                warn!("{url}: {e}");
                ProbeResult {
                    status: None,
                    protocol: None,
                    body_bytes: 0,
                    error: Some(e.to_string()),
                    elapsed: started.elapsed(),
                    url,
                }
            }
        }
    }
}
