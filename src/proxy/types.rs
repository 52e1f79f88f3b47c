//! Proxy endpoint and its shared usage counter.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Username and password for an authenticated proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Proxy username
    pub username: String,
    /// Proxy password
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A forward proxy shared by every worker currently assigned to it.
///
/// `count` is advisory load information for selection policies. It is not a
/// concurrency limit and nothing refuses a worker when it is high.
#[derive(Debug)]
pub struct Proxy {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    count: AtomicI64,
}

impl Proxy {
    /// Creates an unauthenticated proxy.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            count: AtomicI64::new(0),
        }
    }

    /// Attaches credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Proxy host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` of the proxy itself.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Credentials, if the proxy requires them.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Value for a `Proxy-Authorization` header, if the proxy has credentials.
    pub fn authorization(&self) -> Option<String> {
        self.credentials.as_ref().map(|c| {
            let token = STANDARD.encode(format!("{}:{}", c.username, c.password));
            format!("Basic {token}")
        })
    }

    /// Number of workers currently using this proxy.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire(&self) -> i64 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn release(&self) -> i64 {
        self.count.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
