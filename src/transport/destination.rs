//! Request destinations (`host:port`), the key of the negotiated-transport cache.

use std::fmt;

use url::Url;

use crate::error_handling::TransportError;

/// `host:port` pair a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: u16,
}

impl Destination {
    /// Creates a destination from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves the destination of a URL, defaulting the port from the scheme.
    pub fn from_url(url: &Url) -> Result<Self, TransportError> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidUrl(format!("{url} has no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::UnsupportedScheme(url.scheme().to_string()))?;
        Ok(Self::new(host, port))
    }

    /// Host name or address literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host without IPv6 brackets, as used for SNI and socket addresses.
    pub(crate) fn bare_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
