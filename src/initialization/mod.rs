//! Process-wide setup.
//!
//! This module provides:
//! - Logger initialization (`env_logger`, plain or JSON)
//! - The `rustls` crypto provider
//! - Proxy pools loaded from proxy list files

mod logger;

use std::path::Path;

use rustls::crypto::{ring::default_provider, CryptoProvider};

use crate::error_handling::InitializationError;
use crate::proxy::{load_proxy_file, ProxyPool, SelectionPolicy};

// Re-export public API
pub use logger::init_logger_with;

/// Installs `ring` as the process-wide `rustls` crypto provider.
///
/// Identities build their configs with an explicit provider; this covers
/// library code (reqwest's plain-HTTP client) that asks for the default.
/// Calling it more than once is harmless.
pub fn init_crypto_provider() {
    let _ = CryptoProvider::install_default(default_provider());
}

/// Loads a proxy list file into a named pool.
///
/// # Errors
///
/// Returns `InitializationError::ProxyListError` if the file cannot be read or
/// any line is malformed.
pub async fn init_proxy_pool(
    path: &Path,
    name: &str,
    policy: SelectionPolicy,
) -> Result<ProxyPool, InitializationError> {
    let proxies = load_proxy_file(path).await?;
    log::info!(
        "Loaded {} proxies from {} into pool {}",
        proxies.len(),
        path.display(),
        name
    );
    Ok(ProxyPool::new(name, proxies, policy))
}
