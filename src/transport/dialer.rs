//! TCP dialers: direct connections and HTTP CONNECT proxy tunnels.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{MAX_CONNECT_RESPONSE_BYTES, TCP_CONNECT_TIMEOUT_SECS};
use crate::error_handling::TransportError;
use crate::proxy::Proxy;

use super::Destination;

/// Opens the raw TCP stream a handshake runs over.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Connects to `destination`, directly or through a tunnel.
    async fn connect(&self, destination: &Destination) -> Result<TcpStream, TransportError>;

    /// Proxy this dialer tunnels through, if any.
    fn proxy(&self) -> Option<Arc<Proxy>> {
        None
    }
}

/// Builds the dialer for an optional proxy assignment.
pub fn dialer_for(proxy: Option<Arc<Proxy>>) -> Arc<dyn Dialer> {
    match proxy {
        Some(proxy) => Arc::new(ProxyDialer::new(proxy)),
        None => Arc::new(DirectDialer),
    }
}

/// Connects straight to the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn connect(&self, destination: &Destination) -> Result<TcpStream, TransportError> {
        let target = destination.to_string();
        connect_with_timeout((destination.bare_host(), destination.port()), &target).await
    }
}

/// Tunnels through a forward proxy with HTTP CONNECT.
#[derive(Debug, Clone)]
pub struct ProxyDialer {
    proxy: Arc<Proxy>,
}

impl ProxyDialer {
    /// Creates a dialer for `proxy`.
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl Dialer for ProxyDialer {
    async fn connect(&self, destination: &Destination) -> Result<TcpStream, TransportError> {
        let proxy_addr = self.proxy.address();
        let mut stream =
            connect_with_timeout((self.proxy.host(), self.proxy.port()), &proxy_addr).await?;

        let mut request = format!(
            "CONNECT {destination} HTTP/1.1\r\nHost: {destination}\r\nProxy-Connection: keep-alive\r\n"
        );
        if let Some(auth) = self.proxy.authorization() {
            request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
        }
        request.push_str("\r\n");

        let deadline = Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS);
        let status = tokio::time::timeout(deadline, async {
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|source| TransportError::Connect {
                    target: proxy_addr.clone(),
                    source,
                })?;
            read_connect_status(&mut stream, &proxy_addr).await
        })
        .await
        .map_err(|_| TransportError::Timeout {
            stage: "Proxy CONNECT",
            destination: destination.to_string(),
            after: deadline,
        })??;

        if !(200..300).contains(&status) {
            log::warn!("Proxy {proxy_addr} refused CONNECT to {destination}: {status}");
            return Err(TransportError::ProxyTunnel {
                proxy: proxy_addr,
                destination: destination.to_string(),
                status,
            });
        }

        log::debug!("Tunnel to {destination} established through {proxy_addr}");
        Ok(stream)
    }

    fn proxy(&self) -> Option<Arc<Proxy>> {
        Some(Arc::clone(&self.proxy))
    }
}

async fn connect_with_timeout(
    addr: (&str, u16),
    target: &str,
) -> Result<TcpStream, TransportError> {
    let deadline = Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS);
    match tokio::time::timeout(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(source)) => {
            log::debug!("TCP connect to {target} failed: {source}");
            Err(TransportError::Connect {
                target: target.to_string(),
                source,
            })
        }
        Err(_) => Err(TransportError::Timeout {
            stage: "TCP connect",
            destination: target.to_string(),
            after: deadline,
        }),
    }
}

/// Reads the proxy's response head and returns its status code.
///
/// The proxy sends nothing after the head until the client speaks, so reading
/// up to the blank line never consumes tunnelled bytes.
async fn read_connect_status(stream: &mut TcpStream, proxy: &str) -> Result<u16, TransportError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE_BYTES {
            return Err(TransportError::ProxyProtocol {
                proxy: proxy.to_string(),
                reason: "response head too large".to_string(),
            });
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|source| TransportError::Connect {
                target: proxy.to_string(),
                source,
            })?;
        if n == 0 {
            return Err(TransportError::ProxyProtocol {
                proxy: proxy.to_string(),
                reason: "connection closed during CONNECT".to_string(),
            });
        }
        head.push(byte[0]);
    }
    parse_status_line(&head).ok_or_else(|| TransportError::ProxyProtocol {
        proxy: proxy.to_string(),
        reason: "invalid status line".to_string(),
    })
}

fn parse_status_line(head: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(head).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/1.") {
        return None;
    }
    parts.next()?.parse().ok()
}
