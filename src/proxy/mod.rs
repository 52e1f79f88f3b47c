//! Proxy pool.
//!
//! This module provides:
//! - `Proxy`: a forward proxy with optional credentials and an atomic usage count
//! - `ProxyPool`: assigns proxies to workers, moves them between proxies and
//!   rebinds their transports
//! - Proxy list parsing (`host:port` / `host:port:user:pass`)
//!
//! Counts are advisory load information for the selection policy, never an
//! enforced concurrency limit.

mod parse;
mod pool;
mod types;

// Re-export public API
pub use parse::{load_proxy_file, parse_proxy_list};
pub use pool::{ProxyPool, SelectionPolicy};
pub use types::{Credentials, Proxy};
