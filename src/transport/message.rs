//! Request and response values carried through the transport.
//!
//! Bodies are opaque bytes; the transport never interprets them.

use std::fmt;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error_handling::TransportError;

/// Application protocol a destination negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP/1.1 (ALPN `http/1.1`, no ALPN, or plain HTTP)
    Http1,
    /// HTTP/2 (ALPN `h2`)
    Http2,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http1 => "HTTP/1.1",
            Protocol::Http2 => "HTTP/2",
        })
    }
}

/// An outbound request.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: Url,
    /// Request headers (sent in insertion order)
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        })
    }

    /// Creates a GET request.
    pub fn get(url: &str) -> Result<Self, TransportError> {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request with a body.
    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self, TransportError> {
        let mut request = Self::new(Method::POST, url)?;
        request.body = body.into();
        Ok(request)
    }

    /// Appends a header.
    pub fn header(mut self, name: &'static str, value: &str) -> Result<Self, TransportError> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Request(http::Error::from(e)))?;
        self.headers.append(HeaderName::from_static(name), value);
        Ok(self)
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
    /// Protocol the response arrived over
    pub protocol: Protocol,
}

impl Response {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
