//! Interception detection over the peer certificate chain.

use rustls::pki_types::CertificateDer;

use crate::config::INTERCEPTION_ISSUER_SIGNATURES;

/// Whether the peer chain was issued by a known interception or debugging proxy.
///
/// Every certificate's issuer is checked, not just the leaf's, since some tools
/// chain through an intermediate. Certificates that fail to parse are skipped.
pub fn detect_interception(chain: &[CertificateDer<'_>]) -> bool {
    interception_issuer(chain).is_some()
}

/// Returns the first issuer in `chain` matching an interception signature.
pub fn interception_issuer(chain: &[CertificateDer<'_>]) -> Option<String> {
    for cert in chain {
        match x509_parser::parse_x509_certificate(cert.as_ref()) {
            Ok((_, parsed)) => {
                let issuer = parsed.tbs_certificate.issuer.to_string();
                if issuer_matches_signature(&issuer) {
                    return Some(issuer);
                }
            }
            Err(e) => log::debug!("Skipping unparseable peer certificate: {e}"),
        }
    }
    None
}

/// Case-insensitive match of an issuer string against the signature table.
pub(crate) fn issuer_matches_signature(issuer: &str) -> bool {
    let issuer = issuer.to_lowercase();
    INTERCEPTION_ISSUER_SIGNATURES
        .iter()
        .any(|signature| issuer.contains(signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tool_issuers_match() {
        assert!(issuer_matches_signature(
            "O=XK72 Ltd, OU=https://charlesproxy.com/ssl, CN=Charles Proxy CA"
        ));
        assert!(issuer_matches_signature("CN=mitmproxy, O=mitmproxy"));
        assert!(issuer_matches_signature(
            "CN=DO_NOT_TRUST_FiddlerRoot, O=DO_NOT_TRUST, OU=Created by http://www.fiddler2.com"
        ));
        assert!(issuer_matches_signature(
            "CN=PortSwigger CA, OU=PortSwigger CA, O=PortSwigger"
        ));
    }

    #[test]
    fn test_public_cas_do_not_match() {
        assert!(!issuer_matches_signature(
            "C=US, O=Let's Encrypt, CN=R11"
        ));
        assert!(!issuer_matches_signature(
            "C=US, O=DigiCert Inc, CN=DigiCert Global G2 TLS RSA SHA256 2020 CA1"
        ));
    }

    #[test]
    fn test_garbage_certificates_are_skipped() {
        let garbage = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x01]);
        assert!(!detect_interception(&[garbage]));
        assert!(!detect_interception(&[]));
    }
}
