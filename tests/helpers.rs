// Shared test helpers: TLS fixtures, local HTTPS servers and a CONNECT proxy.
//
// The fixtures under tests/fixtures are ECDSA P-256 certificates for
// `localhost`: one chain under a private test root, one under a CA whose
// subject mimics the Charles debugging proxy.

#![allow(dead_code)] // Each test file uses a subset

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::Acceptor;
use rustls::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_rustls::LazyConfigAcceptor;

use stockrush::transport::{ClientIdentity, DirectDialer, Transport, TransportOptions};

pub const BODY: &[u8] = b"in stock";

/// Which certificate chain a test server presents.
#[derive(Debug, Clone, Copy)]
pub enum Chain {
    /// Issued by the private test root
    Trusted,
    /// Issued by a CA named like an interception proxy
    Intercepted,
}

fn der(bytes: &[u8]) -> CertificateDer<'static> {
    CertificateDer::from(bytes.to_vec())
}

pub fn trusted_ca() -> CertificateDer<'static> {
    der(include_bytes!("fixtures/trusted-ca.der"))
}

pub fn intercept_ca() -> CertificateDer<'static> {
    der(include_bytes!("fixtures/intercept-ca.der"))
}

fn chain(chain: Chain) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let (leaf, key, ca): (&[u8], &[u8], _) = match chain {
        Chain::Trusted => (
            include_bytes!("fixtures/trusted-leaf.der"),
            include_bytes!("fixtures/trusted-leaf.key.der"),
            trusted_ca(),
        ),
        Chain::Intercepted => (
            include_bytes!("fixtures/intercept-leaf.der"),
            include_bytes!("fixtures/intercept-leaf.key.der"),
            intercept_ca(),
        ),
    };
    (
        vec![der(leaf), ca],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.to_vec())),
    )
}

/// A local HTTPS server answering every request with [`BODY`].
///
/// Responses echo the request's User-Agent in `x-seen-user-agent` and the HTTP
/// version in `x-seen-version`.
pub struct TlsServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    offered_alpn: Arc<Mutex<Vec<Vec<Vec<u8>>>>>,
}

impl TlsServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.port(), path)
    }

    /// Completed server-side TLS handshakes.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// ALPN list offered by every ClientHello received, in arrival order.
    pub fn offered_alpn(&self) -> Vec<Vec<Vec<u8>>> {
        self.offered_alpn.lock().unwrap().clone()
    }
}

/// How long a test server keeps a connection open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Serve until the client goes away
    KeepAlive,
    /// Shut the connection down gracefully after its first response
    OneResponse,
}

pub async fn spawn_tls_server(which: Chain, alpn: &[&[u8]]) -> TlsServer {
    spawn_tls_server_with(which, alpn, Lifetime::KeepAlive).await
}

pub async fn spawn_tls_server_with(which: Chain, alpn: &[&[u8]], lifetime: Lifetime) -> TlsServer {
    let (certs, key) = chain(which);
    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .unwrap();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let offered_alpn = Arc::new(Mutex::new(Vec::new()));
    let counter = Arc::clone(&accepted);
    let offers = Arc::clone(&offered_alpn);

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let config = Arc::clone(&config);
            let counter = Arc::clone(&counter);
            let offers = Arc::clone(&offers);
            tokio::spawn(async move {
                let Ok(start) = LazyConfigAcceptor::new(Acceptor::default(), tcp).await else {
                    return;
                };
                let offered: Vec<Vec<u8>> = start
                    .client_hello()
                    .alpn()
                    .map(|protocols| protocols.map(<[u8]>::to_vec).collect())
                    .unwrap_or_default();
                offers.lock().unwrap().push(offered);

                let Ok(tls) = start.into_stream(config).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let h2 = tls.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
                let io = TokioIo::new(tls);

                let served = Arc::new(Notify::new());
                let notify = Arc::clone(&served);
                let service = service_fn(move |request| {
                    let notify = Arc::clone(&notify);
                    async move {
                        let response = respond(request).await;
                        notify.notify_one();
                        response
                    }
                });

                // Both connection types expose the same inherent graceful_shutdown
                macro_rules! serve {
                    ($connection:expr) => {{
                        let mut connection = pin!($connection);
                        if lifetime == Lifetime::OneResponse {
                            tokio::select! {
                                _ = connection.as_mut() => return,
                                _ = served.notified() => {}
                            }
                            connection.as_mut().graceful_shutdown();
                        }
                        let _ = connection.await;
                    }};
                }

                if h2 {
                    serve!(hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service));
                } else {
                    serve!(hyper::server::conn::http1::Builder::new().serve_connection(io, service));
                }
            });
        }
    });

    TlsServer {
        addr,
        accepted,
        offered_alpn,
    }
}

async fn respond(
    request: hyper::Request<hyper::body::Incoming>,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let user_agent = request
        .headers()
        .get(hyper::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let response = hyper::Response::builder()
        .header("x-seen-user-agent", user_agent)
        .header("x-seen-version", format!("{:?}", request.version()))
        .body(Full::new(Bytes::from_static(BODY)))
        .unwrap();
    Ok(response)
}

/// A forward proxy that only speaks CONNECT.
pub struct ConnectProxy {
    pub addr: SocketAddr,
    tunnels: Arc<AtomicUsize>,
}

impl ConnectProxy {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Tunnels opened so far.
    pub fn tunnels(&self) -> usize {
        self.tunnels.load(Ordering::SeqCst)
    }
}

/// Spawns a CONNECT proxy; `expected_auth` is the required
/// `Proxy-Authorization` value, answered with 407 when it does not match.
pub async fn spawn_connect_proxy(expected_auth: Option<String>) -> ConnectProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let tunnels = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&tunnels);

    tokio::spawn(async move {
        while let Ok((mut client, _)) = listener.accept().await {
            let expected_auth = expected_auth.clone();
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let Some(head) = read_head(&mut client).await else {
                    return;
                };
                let mut lines = head.lines();
                let target = lines
                    .next()
                    .and_then(|l| l.strip_prefix("CONNECT "))
                    .and_then(|l| l.split_whitespace().next())
                    .map(str::to_string);
                let auth = lines.find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("proxy-authorization")
                        .then(|| value.trim().to_string())
                });

                let Some(target) = target else {
                    let _ = client.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n").await;
                    return;
                };
                if expected_auth.is_some() && auth != expected_auth {
                    let _ = client
                        .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                        .await;
                    return;
                }
                let Ok(mut upstream) = TcpStream::connect(&target).await else {
                    let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                if client
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .is_err()
                {
                    return;
                }
                let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
            });
        }
    });

    ConnectProxy { addr, tunnels }
}

async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).ok()
}

/// A direct transport trusting `roots` in addition to the webpki roots.
pub fn transport_trusting(
    identity: ClientIdentity,
    roots: Vec<CertificateDer<'static>>,
) -> Transport {
    stockrush::initialization::init_crypto_provider();
    Transport::new(
        identity,
        Arc::new(DirectDialer),
        TransportOptions {
            extra_roots: roots,
            ..Default::default()
        },
    )
    .unwrap()
}
