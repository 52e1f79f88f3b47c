//! Handshake and protocol negotiation for one destination.
//!
//! A successful handshake yields a [`NegotiatedTransport`]: an HTTP/2 sender
//! wrapping the live TLS connection when the peer picked `h2`, otherwise a set
//! of HTTP/1.1 connections seeded with the negotiated one. Every HTTP/1.1
//! redial repeats the identity's full handshake, ALPN offer included.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, HOST, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::client::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::{TCP_CONNECT_TIMEOUT_SECS, TLS_HANDSHAKE_TIMEOUT_SECS};
use crate::error_handling::TransportError;

use super::identity::Http2Settings;
use super::interception::interception_issuer;
use super::{Destination, Dialer, Protocol, Request, Response};

/// Outcome of a completed handshake, owned by the transport cache.
#[derive(Debug)]
pub struct NegotiatedTransport {
    destination: Destination,
    inner: Negotiated,
}

#[derive(Debug)]
enum Negotiated {
    Http2(http2::SendRequest<Full<Bytes>>),
    Http1(Http1Connections),
}

impl NegotiatedTransport {
    /// Destination this transport is bound to.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Protocol the peer selected.
    pub fn protocol(&self) -> Protocol {
        match self.inner {
            Negotiated::Http2(_) => Protocol::Http2,
            Negotiated::Http1(_) => Protocol::Http1,
        }
    }

    /// Whether the underlying connection can still carry requests.
    ///
    /// HTTP/1.1 destinations redial on demand and are always usable.
    pub(crate) fn is_usable(&self) -> bool {
        match &self.inner {
            Negotiated::Http2(sender) => !sender.is_closed(),
            Negotiated::Http1(_) => true,
        }
    }

    pub(crate) async fn send(
        &self,
        request: Request,
        user_agent: &str,
    ) -> Result<Response, TransportError> {
        match &self.inner {
            Negotiated::Http2(sender) => send_http2(sender.clone(), request, user_agent).await,
            Negotiated::Http1(connections) => connections.send(request, user_agent).await,
        }
    }
}

/// TLS material a handshake needs.
pub(crate) struct HandshakeConfig<'a> {
    pub tls: &'a Arc<ClientConfig>,
    pub http2: Http2Settings,
}

/// Dials, performs the fingerprinted handshake and wraps the result.
///
/// Fails with [`TransportError::Intercepted`] when the peer chain carries an
/// interception-tool issuer.
pub(crate) async fn negotiate(
    destination: &Destination,
    dialer: &Arc<dyn Dialer>,
    config: HandshakeConfig<'_>,
) -> Result<NegotiatedTransport, TransportError> {
    let tls = handshake(destination, dialer.as_ref(), config.tls).await?;

    let (_, session) = tls.get_ref();
    let negotiated_h2 = session.alpn_protocol() == Some(b"h2".as_slice());
    log::debug!(
        "Negotiated {} with {destination} ({:?}, {:?})",
        if negotiated_h2 { "h2" } else { "http/1.1" },
        session.protocol_version(),
        session.negotiated_cipher_suite().map(|cs| cs.suite()),
    );

    let inner = if negotiated_h2 {
        Negotiated::Http2(wrap_http2(tls, destination, config.http2).await?)
    } else {
        let first = wrap_http1(tls, destination).await?;
        Negotiated::Http1(Http1Connections {
            destination: destination.clone(),
            dialer: Arc::clone(dialer),
            tls: Arc::clone(config.tls),
            idle: Mutex::new(vec![first]),
        })
    };

    Ok(NegotiatedTransport {
        destination: destination.clone(),
        inner,
    })
}

/// TCP connect plus the identity's TLS handshake, with the interception check.
async fn handshake(
    destination: &Destination,
    dialer: &dyn Dialer,
    tls: &Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let server_name = ServerName::try_from(destination.bare_host().to_string()).map_err(|e| {
        TransportError::InvalidServerName {
            host: destination.host().to_string(),
            reason: e.to_string(),
        }
    })?;

    let tcp = dialer.connect(destination).await?;

    let deadline = Duration::from_secs(TLS_HANDSHAKE_TIMEOUT_SECS);
    let connector = TlsConnector::from(Arc::clone(tls));
    let stream = match tokio::time::timeout(deadline, connector.connect(server_name, tcp)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            log::debug!("TLS handshake with {destination} failed: {source}");
            return Err(TransportError::Handshake {
                destination: destination.to_string(),
                source,
            });
        }
        Err(_) => {
            return Err(TransportError::Timeout {
                stage: "TLS handshake",
                destination: destination.to_string(),
                after: deadline,
            })
        }
    };

    if let Some(issuer) = stream.get_ref().1.peer_certificates().and_then(interception_issuer) {
        log::error!("Interception proxy detected for {destination}: {issuer}");
        return Err(TransportError::Intercepted {
            destination: destination.to_string(),
            issuer,
        });
    }
    Ok(stream)
}

async fn wrap_http2(
    tls: TlsStream<TcpStream>,
    destination: &Destination,
    settings: Http2Settings,
) -> Result<http2::SendRequest<Full<Bytes>>, TransportError> {
    let mut builder = http2::Builder::new(TokioExecutor::new());
    builder
        .initial_stream_window_size(settings.initial_stream_window)
        .initial_connection_window_size(settings.initial_connection_window);

    let (sender, connection) = builder.handshake(TokioIo::new(tls)).await?;

    let label = destination.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::debug!("HTTP/2 connection to {label} closed: {e}");
        }
    });

    Ok(sender)
}

async fn wrap_http1(
    tls: TlsStream<TcpStream>,
    destination: &Destination,
) -> Result<http1::SendRequest<Full<Bytes>>, TransportError> {
    let (sender, connection) = http1::handshake(TokioIo::new(tls)).await?;

    let label = destination.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::debug!("HTTP/1.1 connection to {label} closed: {e}");
        }
    });

    Ok(sender)
}

/// Keep-alive HTTP/1.1 connections to one destination.
///
/// Idle connections are reused; when none is ready a new one is opened with the
/// same dialer and the same fingerprinted handshake as the first.
#[derive(Debug)]
struct Http1Connections {
    destination: Destination,
    dialer: Arc<dyn Dialer>,
    tls: Arc<ClientConfig>,
    idle: Mutex<Vec<http1::SendRequest<Full<Bytes>>>>,
}

impl Http1Connections {
    async fn send(&self, request: Request, user_agent: &str) -> Result<Response, TransportError> {
        let mut outgoing = outgoing_request(request, user_agent, Protocol::Http1)?;
        let (sender, response) = loop {
            let (mut sender, reused) = self.checkout().await?;
            match sender.try_send_request(outgoing).await {
                Ok(response) => break (sender, response),
                Err(mut failed) => match failed.take_message() {
                    // A kept-alive connection closed before the request went out
                    Some(message) if reused => {
                        log::debug!("Stale HTTP/1.1 connection to {}, redialing", self.destination);
                        outgoing = message;
                    }
                    _ => return Err(failed.into_error().into()),
                },
            }
        };

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        if !sender.is_closed() {
            self.idle().push(sender);
        }

        Ok(Response {
            status: parts.status,
            headers: parts.headers,
            body,
            protocol: Protocol::Http1,
        })
    }

    /// An idle ready connection, or a freshly dialed one. The flag is true for reuse.
    async fn checkout(&self) -> Result<(http1::SendRequest<Full<Bytes>>, bool), TransportError> {
        loop {
            let candidate = self.idle().pop();
            let Some(mut sender) = candidate else {
                break;
            };
            if !sender.is_closed() && sender.ready().await.is_ok() {
                return Ok((sender, true));
            }
        }

        let tls = handshake(&self.destination, self.dialer.as_ref(), &self.tls).await?;
        log::debug!("Opened HTTP/1.1 connection to {}", self.destination);
        Ok((wrap_http1(tls, &self.destination).await?, false))
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<http1::SendRequest<Full<Bytes>>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds the vanilla client used for plain-HTTP destinations.
pub(crate) fn build_plain_client(dialer: &dyn Dialer) -> Result<reqwest::Client, TransportError> {
    let builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS));
    Ok(with_proxy(builder, dialer)?.build()?)
}

fn with_proxy(
    builder: reqwest::ClientBuilder,
    dialer: &dyn Dialer,
) -> Result<reqwest::ClientBuilder, TransportError> {
    match dialer.proxy() {
        Some(proxy) => {
            let mut rp = reqwest::Proxy::all(format!("http://{}", proxy.address()))?;
            if let Some(creds) = proxy.credentials() {
                rp = rp.basic_auth(&creds.username, &creds.password);
            }
            Ok(builder.proxy(rp))
        }
        None => Ok(builder.no_proxy()),
    }
}

/// Converts a [`Request`] into the form hyper sends on `protocol`.
///
/// HTTP/2 takes the absolute URI and derives its pseudo-headers from it.
/// HTTP/1.1 takes the origin form plus a `Host` header.
fn outgoing_request(
    request: Request,
    user_agent: &str,
    protocol: Protocol,
) -> Result<http::Request<Full<Bytes>>, TransportError> {
    let uri = match protocol {
        Protocol::Http2 => request.url.as_str(),
        Protocol::Http1 => &request.url[url::Position::BeforePath..url::Position::AfterQuery],
    };
    let mut builder = http::Request::builder().method(request.method).uri(uri);
    if let Some(headers) = builder.headers_mut() {
        *headers = request.headers;
        match protocol {
            Protocol::Http2 => {
                headers.remove(HOST);
            }
            Protocol::Http1 if !headers.contains_key(HOST) => {
                let authority = &request.url[url::Position::BeforeHost..url::Position::AfterPort];
                headers.insert(
                    HOST,
                    HeaderValue::from_str(authority).map_err(http::Error::from)?,
                );
            }
            Protocol::Http1 => {}
        }
        if !headers.contains_key(USER_AGENT) {
            if let Ok(value) = HeaderValue::from_str(user_agent) {
                headers.insert(USER_AGENT, value);
            }
        }
    }
    Ok(builder.body(Full::new(request.body))?)
}

async fn send_http2(
    mut sender: http2::SendRequest<Full<Bytes>>,
    request: Request,
    user_agent: &str,
) -> Result<Response, TransportError> {
    let outgoing = outgoing_request(request, user_agent, Protocol::Http2)?;

    sender.ready().await?;
    let response = sender.send_request(outgoing).await?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();

    Ok(Response {
        status: parts.status,
        headers: parts.headers,
        body,
        protocol: Protocol::Http2,
    })
}

/// Sends a plain-HTTP request through the vanilla client.
pub(crate) async fn send_plain(
    client: &reqwest::Client,
    request: Request,
    user_agent: &str,
) -> Result<Response, TransportError> {
    let mut headers = request.headers;
    if !headers.contains_key(USER_AGENT) {
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }
    }

    let response = client
        .request(request.method, request.url)
        .headers(headers)
        .body(request.body)
        .send()
        .await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    Ok(Response {
        status,
        headers,
        body,
        protocol: Protocol::Http1,
    })
}
