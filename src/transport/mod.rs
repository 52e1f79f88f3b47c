//! Fingerprinted transport.
//!
//! This module provides:
//! - `ClientIdentity`: the TLS/HTTP fingerprint a worker impersonates
//! - `Dialer`: direct TCP or HTTP CONNECT tunnels through a proxy
//! - `Transport`: per-worker handshake cache keyed by `Destination`, with
//!   HTTP/1.1 vs HTTP/2 chosen per destination from the ALPN result
//! - Interception detection over the peer certificate chain
//!
//! Errors are returned to the caller as-is; retry policy belongs to the engine.

mod destination;
mod dialer;
mod identity;
mod interception;
mod message;
mod negotiate;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::ClientConfig;
use rustls::pki_types::CertificateDer;
use tokio::sync::Mutex;

use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::error_handling::TransportError;
use crate::proxy::Proxy;

// Re-export public API
pub use destination::Destination;
pub use dialer::{dialer_for, Dialer, DirectDialer, ProxyDialer};
pub use identity::{ClientIdentity, Http2Settings};
pub use interception::{detect_interception, interception_issuer};
pub use message::{Protocol, Request, Response};
pub use negotiate::NegotiatedTransport;

use negotiate::{build_plain_client, negotiate, send_plain, HandshakeConfig};

/// Tunables for a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Deadline for a whole request, first-contact handshake included
    pub request_timeout: Duration,
    /// Root certificates trusted in addition to the bundled webpki roots
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            extra_roots: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct CacheState {
    dialer: Arc<dyn Dialer>,
    negotiated: HashMap<Destination, Arc<NegotiatedTransport>>,
    plain: Option<reqwest::Client>,
}

/// One worker's view of the network.
///
/// The first request to a destination dials and negotiates while holding the
/// cache lock, so concurrent first contacts to the same destination serialize
/// and share one handshake. Every TLS connection, including HTTP/1.1 redials,
/// uses the identity's full client configuration. [`Transport::rebind`] discards the whole cache.
#[derive(Debug)]
pub struct Transport {
    identity: ClientIdentity,
    tls: Arc<ClientConfig>,
    options: TransportOptions,
    state: Mutex<CacheState>,
    handshakes: AtomicUsize,
}

impl Transport {
    /// Compiles `identity` and creates an empty transport over `dialer`.
    pub fn new(
        identity: ClientIdentity,
        dialer: Arc<dyn Dialer>,
        options: TransportOptions,
    ) -> Result<Self, rustls::Error> {
        let tls = identity.tls_config(&options.extra_roots)?;

        Ok(Self {
            identity,
            tls: Arc::new(tls),
            options,
            state: Mutex::new(CacheState {
                dialer,
                negotiated: HashMap::new(),
                plain: None,
            }),
            handshakes: AtomicUsize::new(0),
        })
    }

    /// Identity this transport impersonates.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Returns the cached transport for `destination`, negotiating it first if needed.
    ///
    /// Nothing is cached when the handshake fails or the peer looks intercepted.
    pub async fn dial(
        &self,
        destination: &Destination,
    ) -> Result<Arc<NegotiatedTransport>, TransportError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.negotiated.get(destination) {
            if existing.is_usable() {
                return Ok(Arc::clone(existing));
            }
            log::debug!("Evicting closed HTTP/2 connection to {destination}");
            state.negotiated.remove(destination);
        }

        let negotiated = negotiate(
            destination,
            &state.dialer,
            HandshakeConfig {
                tls: &self.tls,
                http2: self.identity.http2_settings(),
            },
        )
        .await?;
        self.handshakes.fetch_add(1, Ordering::Relaxed);

        log::info!(
            "{} negotiated {} with {destination}",
            self.identity.label(),
            negotiated.protocol()
        );
        let negotiated = Arc::new(negotiated);
        state
            .negotiated
            .insert(destination.clone(), Arc::clone(&negotiated));
        Ok(negotiated)
    }

    /// Executes `request`, dialing its destination on first contact.
    ///
    /// `https` goes through the fingerprinted cache; `http` uses a vanilla client
    /// over the same proxy. The whole exchange is bounded by the request timeout.
    pub async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        let destination = Destination::from_url(&request.url)?;
        let deadline = self.options.request_timeout;
        let user_agent = self.identity.user_agent();

        let exchange = async {
            match request.url.scheme() {
                "https" => {
                    let negotiated = self.dial(&destination).await?;
                    negotiated.send(request, user_agent).await
                }
                "http" => {
                    let client = self.plain_client().await?;
                    send_plain(&client, request, user_agent).await
                }
                other => Err(TransportError::UnsupportedScheme(other.to_string())),
            }
        };

        match tokio::time::timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                stage: "Request",
                destination: destination.to_string(),
                after: deadline,
            }),
        }
    }

    /// Swaps the dialer and discards every cached transport.
    pub async fn rebind(&self, dialer: Arc<dyn Dialer>) {
        let mut state = self.state.lock().await;
        let discarded = state.negotiated.len();
        state.negotiated.clear();
        state.plain = None;
        state.dialer = dialer;
        match state.dialer.proxy() {
            Some(proxy) => log::info!(
                "{} rebound to proxy {proxy}, discarded {discarded} cached transports",
                self.identity.label()
            ),
            None => log::info!(
                "{} rebound to direct dialing, discarded {discarded} cached transports",
                self.identity.label()
            ),
        }
    }

    /// Proxy the current dialer tunnels through.
    pub async fn proxy(&self) -> Option<Arc<Proxy>> {
        self.state.lock().await.dialer.proxy()
    }

    /// Protocol cached for `destination`, if it has been negotiated.
    pub async fn protocol_for(&self, destination: &Destination) -> Option<Protocol> {
        self.state
            .lock()
            .await
            .negotiated
            .get(destination)
            .map(|n| n.protocol())
    }

    /// Destinations with a cached transport.
    pub async fn cached_destinations(&self) -> Vec<Destination> {
        self.state.lock().await.negotiated.keys().cloned().collect()
    }

    /// First-contact negotiations completed over this transport's lifetime.
    ///
    /// HTTP/1.1 keep-alive redials are not counted.
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::Relaxed)
    }

    async fn plain_client(&self) -> Result<reqwest::Client, TransportError> {
        let mut state = self.state.lock().await;
        if let Some(client) = &state.plain {
            return Ok(client.clone());
        }
        let client = build_plain_client(state.dialer.as_ref())?;
        state.plain = Some(client.clone());
        Ok(client)
    }
}
