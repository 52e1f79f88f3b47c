//! Configuration constants.
//!
//! This module defines the timeouts, polling intervals and detection tables
//! used throughout the transport and the orchestration engine.

use std::time::Duration;

// Network operation timeouts
/// TCP connection timeout in seconds (direct dial or proxy CONNECT)
pub const TCP_CONNECT_TIMEOUT_SECS: u64 = 5;
/// TLS handshake timeout in seconds
pub const TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 5;
/// Default whole-request deadline in seconds
///
/// Cancellation never interrupts an in-flight request, so every request carries
/// its own deadline instead.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum size of a proxy CONNECT response head in bytes
pub const MAX_CONNECT_RESPONSE_BYTES: usize = 8 * 1024;

// Orchestration timing
/// How often a stop watcher polls its worker's stop flag
pub const STOP_WATCH_INTERVAL: Duration = Duration::from_millis(50);
/// How often a waiting task polls its group's stock slot
pub const STOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Delay between step retries when a step does not set its own
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3500);
/// Delay between monitor poll cycles when a group does not set its own
pub const DEFAULT_MONITOR_DELAY: Duration = Duration::from_millis(3500);
/// Pause before a crashed refresh loop is restarted
pub const REFRESH_RESTART_DELAY: Duration = Duration::from_secs(1);

// Interception detection
/// Issuer fragments of well-known interception and debugging proxies.
///
/// Matched case-insensitively against every certificate issuer in the peer chain.
pub const INTERCEPTION_ISSUER_SIGNATURES: &[&str] = &[
    "charles proxy",
    "charlesproxy",
    "mitmproxy",
    "do_not_trust_fiddlerroot",
    "fiddler",
    "portswigger",
    "burp",
    "http toolkit",
    "proxyman",
    "telerik",
];

/// Default User-Agent string for the Chrome identity.
pub const CHROME_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
/// Default User-Agent string for the Firefox identity.
pub const FIREFOX_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0";
/// Default User-Agent string for the Safari identity.
pub const SAFARI_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15";
