//! Handshake caching, protocol negotiation and interception detection against
//! local HTTPS servers.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use helpers::{
    intercept_ca, spawn_tls_server, spawn_tls_server_with, transport_trusting, trusted_ca, Chain,
    Lifetime, BODY,
};
use stockrush::config::CHROME_USER_AGENT;
use stockrush::transport::{
    ClientIdentity, Destination, DirectDialer, Protocol, Request, Response,
};
use stockrush::TransportError;

fn alpn_bytes(identity: &ClientIdentity) -> Vec<Vec<u8>> {
    identity.alpn().iter().map(|p| p.as_bytes().to_vec()).collect()
}

fn header<'a>(response: &'a Response, name: &str) -> &'a str {
    response
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_http2_destination_handshakes_once() {
    let server = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let transport = transport_trusting(ClientIdentity::chrome(), vec![trusted_ca()]);

    for i in 0..5 {
        let response = transport
            .round_trip(Request::get(&server.url(&format!("/products/{i}"))).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.protocol, Protocol::Http2);
        assert_eq!(response.body.as_ref(), BODY);
        assert_eq!(header(&response, "x-seen-version"), "HTTP/2.0");
    }

    assert_eq!(transport.handshake_count(), 1);
    assert_eq!(server.accepted(), 1);
    assert_eq!(
        transport
            .protocol_for(&Destination::new("localhost", server.port()))
            .await,
        Some(Protocol::Http2)
    );
}

#[tokio::test]
async fn test_http1_destination_handshakes_once() {
    let server = spawn_tls_server(Chain::Trusted, &[b"http/1.1"]).await;
    let transport = transport_trusting(ClientIdentity::firefox(), vec![trusted_ca()]);

    for _ in 0..5 {
        let response = transport
            .round_trip(Request::get(&server.url("/cart")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.protocol, Protocol::Http1);
        assert_eq!(header(&response, "x-seen-version"), "HTTP/1.1");
    }

    assert_eq!(transport.handshake_count(), 1);
    // The negotiated connection itself carries the traffic
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_http1_redials_offer_identity_alpn() {
    let server = spawn_tls_server_with(Chain::Trusted, &[b"http/1.1"], Lifetime::OneResponse).await;
    let identity = ClientIdentity::chrome();
    let transport = transport_trusting(identity.clone(), vec![trusted_ca()]);

    for _ in 0..3 {
        let response = transport
            .round_trip(Request::get(&server.url("/cart")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.protocol, Protocol::Http1);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(server.accepted(), 3);
    assert_eq!(transport.handshake_count(), 1);
    let offers = server.offered_alpn();
    assert_eq!(offers.len(), 3);
    for offer in offers {
        assert_eq!(offer, alpn_bytes(&identity));
    }
}

#[tokio::test]
async fn test_closed_http2_connection_is_redialed() {
    let server = spawn_tls_server_with(Chain::Trusted, &[b"h2"], Lifetime::OneResponse).await;
    let transport = transport_trusting(ClientIdentity::chrome(), vec![trusted_ca()]);

    let first = transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(first.protocol, Protocol::Http2);

    // Let the GOAWAY and close reach the client
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(second.protocol, Protocol::Http2);
    assert_eq!(second.body.as_ref(), BODY);
    assert_eq!(transport.handshake_count(), 2);
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn test_concurrent_first_contact_shares_one_handshake() {
    let server = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let transport = Arc::new(transport_trusting(
        ClientIdentity::chrome(),
        vec![trusted_ca()],
    ));

    let requests = (0..8).map(|_| {
        let transport = Arc::clone(&transport);
        let url = server.url("/stock");
        async move { transport.round_trip(Request::get(&url).unwrap()).await }
    });
    let responses = join_all(requests).await;

    assert!(responses
        .iter()
        .all(|r| r.as_ref().is_ok_and(|r| r.protocol == Protocol::Http2)));
    assert_eq!(transport.handshake_count(), 1);
}

#[tokio::test]
async fn test_destinations_negotiate_independently() {
    let h2 = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let h1 = spawn_tls_server(Chain::Trusted, &[b"http/1.1"]).await;
    let transport = transport_trusting(ClientIdentity::safari(), vec![trusted_ca()]);

    let a = transport
        .round_trip(Request::get(&h2.url("/")).unwrap())
        .await
        .unwrap();
    let b = transport
        .round_trip(Request::get(&h1.url("/")).unwrap())
        .await
        .unwrap();

    assert_eq!(a.protocol, Protocol::Http2);
    assert_eq!(b.protocol, Protocol::Http1);
    assert_eq!(transport.handshake_count(), 2);
    assert_eq!(transport.cached_destinations().await.len(), 2);
}

#[tokio::test]
async fn test_identity_user_agent_injected_unless_set() {
    let server = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let transport = transport_trusting(ClientIdentity::chrome(), vec![trusted_ca()]);

    let injected = transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(header(&injected, "x-seen-user-agent"), CHROME_USER_AGENT);

    let explicit = transport
        .round_trip(
            Request::get(&server.url("/"))
                .unwrap()
                .header("user-agent", "StoreApp/5.1 (iPhone)")
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(header(&explicit, "x-seen-user-agent"), "StoreApp/5.1 (iPhone)");
}

#[tokio::test]
async fn test_interception_detected_and_not_cached() {
    let server = spawn_tls_server(Chain::Intercepted, &[b"h2"]).await;
    // Trust the interception CA so the handshake itself succeeds
    let transport = transport_trusting(ClientIdentity::chrome(), vec![intercept_ca()]);
    let destination = Destination::new("localhost", server.port());

    for _ in 0..2 {
        match transport.dial(&destination).await {
            Err(TransportError::Intercepted { issuer, .. }) => {
                assert!(issuer.contains("Charles Proxy CA"), "issuer: {issuer}")
            }
            other => panic!("expected interception error, got {other:?}"),
        }
    }

    let err = transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("likely intercepted"));
    assert!(transport.cached_destinations().await.is_empty());
    assert_eq!(transport.handshake_count(), 0);
}

#[tokio::test]
async fn test_untrusted_chain_fails_handshake() {
    let server = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let transport = transport_trusting(ClientIdentity::chrome(), Vec::new());

    let err = transport
        .dial(&Destination::new("localhost", server.port()))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Handshake { .. }), "{err:?}");
}

#[tokio::test]
async fn test_rebind_discards_cache_wholesale() {
    let a = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let b = spawn_tls_server(Chain::Trusted, &[b"http/1.1"]).await;
    let transport = transport_trusting(ClientIdentity::chrome(), vec![trusted_ca()]);

    transport
        .round_trip(Request::get(&a.url("/")).unwrap())
        .await
        .unwrap();
    transport
        .round_trip(Request::get(&b.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(transport.cached_destinations().await.len(), 2);

    transport.rebind(Arc::new(DirectDialer)).await;
    assert!(transport.cached_destinations().await.is_empty());

    transport
        .round_trip(Request::get(&a.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(transport.handshake_count(), 3);
    assert_eq!(a.accepted(), 2);
}
