//! Requests tunnelled through a local CONNECT proxy, and proxy rotation.

mod helpers;

use std::sync::Arc;

use helpers::{spawn_connect_proxy, spawn_tls_server, trusted_ca, Chain, BODY};
use stockrush::models::WorkerId;
use stockrush::proxy::{Proxy, ProxyPool, SelectionPolicy};
use stockrush::transport::{dialer_for, ClientIdentity, Protocol, Request, Transport, TransportOptions};
use stockrush::TransportError;

fn transport_via(proxy: Option<Arc<Proxy>>) -> Transport {
    stockrush::initialization::init_crypto_provider();
    Transport::new(
        ClientIdentity::chrome(),
        dialer_for(proxy),
        TransportOptions {
            extra_roots: vec![trusted_ca()],
            ..Default::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_http2_through_authenticated_tunnel() {
    let server = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    // Authorization depends only on the credentials
    let expected = Proxy::new("127.0.0.1", 1).with_credentials("user", "hunter2");
    let tunnel = spawn_connect_proxy(expected.authorization()).await;
    let proxy = Arc::new(
        Proxy::new("127.0.0.1", tunnel.port()).with_credentials("user", "hunter2"),
    );
    let transport = transport_via(Some(proxy));

    for _ in 0..3 {
        let response = transport
            .round_trip(Request::get(&server.url("/")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.protocol, Protocol::Http2);
        assert_eq!(response.body.as_ref(), BODY);
    }
    assert_eq!(tunnel.tunnels(), 1);
    assert_eq!(transport.handshake_count(), 1);
}

#[tokio::test]
async fn test_http1_client_uses_same_proxy() {
    let server = spawn_tls_server(Chain::Trusted, &[b"http/1.1"]).await;
    let tunnel = spawn_connect_proxy(None).await;
    let transport = transport_via(Some(Arc::new(Proxy::new("127.0.0.1", tunnel.port()))));

    let response = transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap();

    assert_eq!(response.protocol, Protocol::Http1);
    let again = transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(again.body.as_ref(), BODY);
    // The negotiated connection is kept alive inside its tunnel
    assert_eq!(tunnel.tunnels(), 1);
}

#[tokio::test]
async fn test_wrong_credentials_rejected() {
    let server = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let tunnel = spawn_connect_proxy(Some("Basic nope".to_string())).await;
    let transport = transport_via(Some(Arc::new(
        Proxy::new("127.0.0.1", tunnel.port()).with_credentials("user", "wrong"),
    )));

    let err = transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap_err();
    assert!(
        matches!(err, TransportError::ProxyTunnel { status: 407, .. }),
        "{err:?}"
    );
    assert!(transport.cached_destinations().await.is_empty());
}

#[tokio::test]
async fn test_rotation_rebinds_onto_new_proxy() {
    let server = spawn_tls_server(Chain::Trusted, &[b"h2"]).await;
    let first = spawn_connect_proxy(None).await;
    let second = spawn_connect_proxy(None).await;
    let pool = ProxyPool::new(
        "residential",
        vec![
            Proxy::new("127.0.0.1", first.port()),
            Proxy::new("127.0.0.1", second.port()),
        ],
        SelectionPolicy::RoundRobin,
    );
    let worker = WorkerId::from("task-1");
    let transport = transport_via(pool.assign(&worker));

    transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(first.tunnels(), 1);

    let next = pool.rotate(&worker, &transport).await.unwrap();
    assert_eq!(next.port(), second.port());
    assert!(transport.cached_destinations().await.is_empty());

    transport
        .round_trip(Request::get(&server.url("/")).unwrap())
        .await
        .unwrap();
    assert_eq!(first.tunnels(), 1);
    assert_eq!(second.tunnels(), 1);
    assert_eq!(transport.handshake_count(), 2);
    assert_eq!(pool.total_load(), 1);
}
