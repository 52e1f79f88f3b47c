//! Client identities: the TLS/HTTP fingerprint a worker impersonates.

use std::sync::Arc;

use rustls::client::ClientConfig;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::CertificateDer;
use rustls::{CipherSuite, NamedGroup, ProtocolVersion, RootCertStore, SupportedProtocolVersion};

use crate::config::{CHROME_USER_AGENT, FIREFOX_USER_AGENT, SAFARI_USER_AGENT};

/// HTTP/2 connection settings sent in the client preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Http2Settings {
    /// SETTINGS_INITIAL_WINDOW_SIZE
    pub initial_stream_window: u32,
    /// Connection-level flow control window
    pub initial_connection_window: u32,
}

/// Immutable description of the handshake to impersonate.
///
/// Chosen once per worker and compiled into a `rustls::ClientConfig` whose
/// cipher-suite and key-exchange lists follow the identity's order and whose
/// ALPN offer list is the identity's. rustls does not expose extension order,
/// so extension layout follows rustls.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIdentity {
    label: String,
    user_agent: String,
    cipher_suites: Vec<CipherSuite>,
    kx_groups: Vec<NamedGroup>,
    versions: Vec<ProtocolVersion>,
    alpn: Vec<String>,
    enable_sni: bool,
    http2: Http2Settings,
}

impl ClientIdentity {
    /// Chrome on Windows.
    pub fn chrome() -> Self {
        Self {
            label: "Chrome-Auto".to_string(),
            user_agent: CHROME_USER_AGENT.to_string(),
            cipher_suites: vec![
                CipherSuite::TLS13_AES_128_GCM_SHA256,
                CipherSuite::TLS13_AES_256_GCM_SHA384,
                CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            ],
            kx_groups: vec![NamedGroup::X25519, NamedGroup::secp256r1, NamedGroup::secp384r1],
            versions: vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2],
            alpn: vec!["h2".to_string(), "http/1.1".to_string()],
            enable_sni: true,
            http2: Http2Settings {
                initial_stream_window: 6_291_456,
                initial_connection_window: 15_728_640,
            },
        }
    }

    /// Firefox on Windows.
    pub fn firefox() -> Self {
        Self {
            label: "Firefox-Auto".to_string(),
            user_agent: FIREFOX_USER_AGENT.to_string(),
            cipher_suites: vec![
                CipherSuite::TLS13_AES_128_GCM_SHA256,
                CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS13_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            ],
            kx_groups: vec![NamedGroup::X25519, NamedGroup::secp256r1, NamedGroup::secp384r1],
            versions: vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2],
            alpn: vec!["h2".to_string(), "http/1.1".to_string()],
            enable_sni: true,
            http2: Http2Settings {
                initial_stream_window: 131_072,
                initial_connection_window: 12_582_912,
            },
        }
    }

    /// Safari on macOS.
    pub fn safari() -> Self {
        Self {
            label: "Safari-Auto".to_string(),
            user_agent: SAFARI_USER_AGENT.to_string(),
            cipher_suites: vec![
                CipherSuite::TLS13_AES_128_GCM_SHA256,
                CipherSuite::TLS13_AES_256_GCM_SHA384,
                CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            ],
            kx_groups: vec![NamedGroup::X25519, NamedGroup::secp256r1, NamedGroup::secp384r1],
            versions: vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2],
            alpn: vec!["h2".to_string(), "http/1.1".to_string()],
            enable_sni: true,
            http2: Http2Settings {
                initial_stream_window: 4_194_304,
                initial_connection_window: 10_485_760,
            },
        }
    }

    /// Returns a copy with a different label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns a copy with a different User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns a copy offering a different ALPN list (e.g. `["http/1.1"]`).
    pub fn with_alpn<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alpn = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Returns a copy with a different cipher-suite order.
    pub fn with_cipher_suites(mut self, suites: Vec<CipherSuite>) -> Self {
        self.cipher_suites = suites;
        self
    }

    /// Human-readable label, e.g. "Chrome-Auto".
    pub fn label(&self) -> &str {
        &self.label
    }

    /// User-Agent sent when a request does not carry its own.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Cipher suites in offer order.
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// ALPN protocols in offer order.
    pub fn alpn(&self) -> &[String] {
        &self.alpn
    }

    /// HTTP/2 preface settings.
    pub fn http2_settings(&self) -> Http2Settings {
        self.http2
    }

    /// Compiles the identity into a TLS client configuration.
    ///
    /// Suites and groups the `ring` provider does not implement are skipped; an
    /// identity left with no usable suite is an error.
    pub fn tls_config(
        &self,
        extra_roots: &[CertificateDer<'static>],
    ) -> Result<ClientConfig, rustls::Error> {
        let base = ring::default_provider();

        let cipher_suites: Vec<_> = self
            .cipher_suites
            .iter()
            .filter_map(|wanted| base.cipher_suites.iter().find(|s| s.suite() == *wanted).copied())
            .collect();
        if cipher_suites.is_empty() {
            return Err(rustls::Error::General(format!(
                "identity {} offers no supported cipher suites",
                self.label
            )));
        }

        let kx_groups: Vec<_> = self
            .kx_groups
            .iter()
            .filter_map(|wanted| base.kx_groups.iter().find(|g| g.name() == *wanted).copied())
            .collect();

        let versions: Vec<&'static SupportedProtocolVersion> = self
            .versions
            .iter()
            .filter_map(|v| match v {
                ProtocolVersion::TLSv1_3 => Some(&rustls::version::TLS13),
                ProtocolVersion::TLSv1_2 => Some(&rustls::version::TLS12),
                _ => None,
            })
            .collect();

        let provider = CryptoProvider {
            cipher_suites,
            kx_groups,
            ..base
        };

        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for root in extra_roots {
            root_store.add(root.clone())?;
        }

        let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&versions)?
            .with_root_certificates(root_store)
            .with_no_client_auth();
        config.alpn_protocols = self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
        config.enable_sni = self.enable_sni;

        log::debug!(
            "Compiled identity {} ({} suites, {} groups, ALPN {:?})",
            self.label,
            config.crypto_provider().cipher_suites.len(),
            config.crypto_provider().kx_groups.len(),
            self.alpn
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_config_preserves_order() {
        let config = ClientIdentity::chrome().tls_config(&[]).unwrap();
        let suites: Vec<CipherSuite> = config
            .crypto_provider()
            .cipher_suites
            .iter()
            .map(|s| s.suite())
            .collect();
        assert_eq!(suites, ClientIdentity::chrome().cipher_suites());
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn test_identities_differ_in_order() {
        assert_ne!(
            ClientIdentity::chrome().cipher_suites(),
            ClientIdentity::firefox().cipher_suites()
        );
        assert_ne!(
            ClientIdentity::chrome().cipher_suites(),
            ClientIdentity::safari().cipher_suites()
        );
    }

    #[test]
    fn test_with_alpn_overrides_offer() {
        let identity = ClientIdentity::chrome().with_alpn(["http/1.1"]);
        let config = identity.tls_config(&[]).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
        assert_eq!(identity.label(), "Chrome-Auto");
    }

    #[test]
    fn test_unsupported_suites_rejected() {
        let identity = ClientIdentity::chrome()
            .with_cipher_suites(vec![CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA]);
        assert!(identity.tls_config(&[]).is_err());
    }

    #[test]
    fn test_unsupported_suites_skipped() {
        let mut suites = vec![CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA];
        suites.extend_from_slice(ClientIdentity::chrome().cipher_suites());
        let config = ClientIdentity::chrome()
            .with_cipher_suites(suites)
            .tls_config(&[])
            .unwrap();
        assert_eq!(config.crypto_provider().cipher_suites.len(), 9);
    }
}
