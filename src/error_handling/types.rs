//! Error type definitions.
//!
//! This module defines the error taxonomy shared by the transport, the proxy
//! pool and the orchestration engine.

use std::time::Duration;

use log::SetLoggerError;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error loading the proxy list.
    #[error("Proxy list initialization error: {0}")]
    ProxyListError(#[from] ProxyError),

    /// Error building a client identity's TLS configuration.
    #[error("TLS configuration error: {0}")]
    TlsConfigError(#[from] rustls::Error),
}

/// Errors produced while dialing, negotiating or executing a request.
///
/// None of these are retried inside the transport; retry policy belongs to the
/// step executor.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request URL could not be parsed or has no host.
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// The request URL uses a scheme other than http or https.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The destination host is not a valid TLS server name.
    #[error("Invalid server name {host}: {reason}")]
    InvalidServerName {
        /// Host that failed validation
        host: String,
        /// Why validation failed
        reason: String,
    },

    /// TCP connect (direct or to the proxy) failed.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        /// `host:port` that was being dialed
        target: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The proxy refused or failed the CONNECT tunnel.
    #[error("Proxy {proxy} refused CONNECT to {destination} with status {status}")]
    ProxyTunnel {
        /// Proxy `host:port`
        proxy: String,
        /// Tunnel destination
        destination: String,
        /// Status code returned by the proxy
        status: u16,
    },

    /// The proxy answered CONNECT with something that is not HTTP.
    #[error("Malformed proxy response from {proxy}: {reason}")]
    ProxyProtocol {
        /// Proxy `host:port`
        proxy: String,
        /// What was wrong with the response
        reason: String,
    },

    /// The TLS handshake failed.
    #[error("TLS handshake with {destination} failed: {source}")]
    Handshake {
        /// Destination being negotiated
        destination: String,
        /// Underlying I/O error carrying the TLS alert
        #[source]
        source: std::io::Error,
    },

    /// The peer presented a certificate issued by a known interception proxy.
    #[error("Connection to {destination} is likely intercepted (issuer: {issuer})")]
    Intercepted {
        /// Destination being negotiated
        destination: String,
        /// Offending issuer string
        issuer: String,
    },

    /// A connect, handshake or request deadline elapsed.
    #[error("{stage} timeout for {destination} ({}s)", .after.as_secs())]
    Timeout {
        /// Which stage timed out (connect, handshake, request)
        stage: &'static str,
        /// Destination being contacted
        destination: String,
        /// Deadline that elapsed
        after: Duration,
    },

    /// Building the request failed.
    #[error("Invalid request: {0}")]
    Request(#[from] http::Error),

    /// A fingerprinted HTTP/1.1 or HTTP/2 connection failed.
    #[error("HTTP connection error: {0}")]
    Connection(#[from] hyper::Error),

    /// The plain HTTP client failed.
    #[error("HTTP error: {0}")]
    Plain(#[from] reqwest::Error),
}

/// Errors produced by the proxy pool.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A proxy list line is not `host:port` or `host:port:user:pass`.
    #[error("Malformed proxy on line {line}: {content}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// Offending line
        content: String,
    },

    /// The proxy list could not be read.
    #[error("Failed to read proxy list: {0}")]
    Io(#[from] std::io::Error),

    /// A reassignment named a proxy the pool does not hold.
    #[error("Proxy {proxy} is not part of pool {pool}")]
    ForeignProxy {
        /// Proxy `host:port`
        proxy: String,
        /// Pool name
        pool: String,
    },

    /// A move was requested for a worker with no current assignment.
    #[error("Worker {worker} holds no proxy from pool {pool}")]
    NotAssigned {
        /// Worker id
        worker: String,
        /// Pool name
        pool: String,
    },
}

/// Failure reported by a pipeline step.
#[derive(Error, Debug)]
pub enum StepError {
    /// Ordinary failure; retried per the step's policy.
    #[error("{0}")]
    Failed(String),

    /// Definitive business rejection (e.g. payment declined).
    ///
    /// Terminal for checkout steps regardless of remaining retry budget.
    #[error("declined: {0}")]
    Declined(String),
}

impl StepError {
    /// Creates a retryable failure.
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    /// Creates a declined outcome.
    pub fn declined(message: impl Into<String>) -> Self {
        StepError::Declined(message.into())
    }
}

impl From<TransportError> for StepError {
    fn from(err: TransportError) -> Self {
        StepError::Failed(err.to_string())
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        StepError::Failed(format!("{err:#}"))
    }
}

/// Errors returned by the engine's management accessors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No task group with this id.
    #[error("Unknown task group: {0}")]
    UnknownGroup(String),

    /// A task group with this id already exists.
    #[error("Task group already exists: {0}")]
    DuplicateGroup(String),

    /// No monitor or task with this id.
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// A monitor or task with this id already exists.
    #[error("Worker already exists: {0}")]
    DuplicateWorker(String),

    /// The group names a proxy pool that was never registered.
    #[error("Unknown proxy group: {0}")]
    UnknownProxyGroup(String),

    /// The worker is already running.
    #[error("Worker is already running: {0}")]
    AlreadyRunning(String),

    /// The worker is not running.
    #[error("Worker is not running: {0}")]
    NotRunning(String),

    /// The worker's identity could not be compiled.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),
}

/// Errors produced by the challenge polling helpers.
#[derive(Error, Debug)]
pub enum ChallengeError {
    /// The owning run was cancelled while polling.
    #[error("challenge polling cancelled")]
    Cancelled,

    /// The poll or verification budget ran out.
    #[error("challenge not solved after {attempts} attempts")]
    Exhausted {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// The external solver failed.
    #[error("challenge solver error: {0}")]
    Solver(#[from] anyhow::Error),
}
