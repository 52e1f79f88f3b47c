//! Integration tests for `run_probe`, the CLI's one-shot request runner.

use std::io::Write;

use stockrush::transport::Protocol;
use stockrush::{run_probe, Config, IdentityPreset, LogLevel};
use tempfile::NamedTempFile;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(urls: Vec<String>) -> Config {
    stockrush::initialization::init_crypto_provider();
    Config {
        urls,
        log_level: LogLevel::Error,
        identity: IdentityPreset::Firefox,
        timeout_seconds: 5,
        ..Default::default()
    }
}

fn proxy_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    for line in lines {
        writeln!(file, "{line}").expect("Failed to write proxy line");
    }
    file.flush().expect("Failed to flush file");
    file
}

#[tokio::test]
async fn test_probe_reports_every_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/in-stock"))
        .respond_with(ResponseTemplate::new(200).set_body_string("in stock"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sold-out"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let urls = vec![
        format!("{}/in-stock", server.uri()),
        format!("{}/in-stock", server.uri()),
        format!("{}/sold-out", server.uri()),
        "ftp://shop.example.com/".to_string(),
    ];
    let report = run_probe(config(urls)).await.unwrap();

    assert_eq!(report.results.len(), 4);
    assert_eq!(report.successful(), 3);
    assert_eq!(report.handshakes, 0);
    assert!(report.proxy.is_none());

    let ok: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.status == Some(200))
        .collect();
    assert_eq!(ok.len(), 2);
    assert!(ok
        .iter()
        .all(|r| r.body_bytes == 8 && r.protocol == Some(Protocol::Http1)));

    let failed = report
        .results
        .iter()
        .find(|r| r.status.is_none())
        .expect("ftp URL should fail");
    assert!(failed.url.starts_with("ftp://"));
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_probe_routes_through_proxy_list() {
    // The mock server doubles as a forward proxy for plain HTTP
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stock"))
        .and(header("proxy-authorization", "Basic dXNlcjpodW50ZXIy"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&proxy)
        .await;
    let port = proxy.address().port();
    let file = proxy_file(&[
        "# residential",
        &format!("127.0.0.1:{port}:user:hunter2"),
    ]);

    let mut config = config(vec!["http://shop.invalid/api/stock".to_string()]);
    config.proxies = Some(file.path().to_path_buf());
    let report = run_probe(config).await.unwrap();

    assert_eq!(report.proxy.as_deref(), Some(format!("127.0.0.1:{port}").as_str()));
    assert_eq!(report.results[0].status, Some(200));
}

#[tokio::test]
async fn test_probe_rejects_malformed_proxy_list() {
    let file = proxy_file(&["127.0.0.1:not-a-port"]);
    let mut config = config(vec!["http://shop.invalid/".to_string()]);
    config.proxies = Some(file.path().to_path_buf());

    let err = run_probe(config).await.unwrap_err();
    assert!(
        format!("{err:#}").contains("Failed to load proxy list"),
        "{err:#}"
    );
}

#[tokio::test]
async fn test_probe_missing_proxy_list() {
    let mut config = config(vec!["http://shop.invalid/".to_string()]);
    config.proxies = Some("/nonexistent/proxies.txt".into());
    assert!(run_probe(config).await.is_err());
}
