//! Certificate material
//!
//! 📜 An issued certificate (chain + private key) parsed once into the form the
//! TLS stack needs. Values are immutable; a reissue produces a new value.

use crate::error::PersistenceError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One day in seconds
pub const DAY_SECS: i64 = 24 * 60 * 60;

/// Current Unix timestamp in seconds
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Canonical form of a hostname used as cache, lock and challenge key.
///
/// Hostnames compare case-insensitively and a fully qualified trailing dot
/// names the same host.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// 📜 Issued certificate with its private key
#[derive(Clone)]
pub struct Certificate {
    chain_pem: String,
    key_pem: String,
    not_after: i64,
    fingerprint: String,
    certified_key: Arc<CertifiedKey>,
}

impl Certificate {
    /// Build a certificate from a PEM chain (leaf first) and a PEM private key.
    pub fn from_pem(
        chain_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        let chain_pem = chain_pem.into();
        let key_pem = key_pem.into();

        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut chain_pem.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| PersistenceError::InvalidCertificate(format!("unreadable chain: {}", e)))?;

        let (not_after, fingerprint) = {
            let leaf = certs
                .first()
                .ok_or_else(|| PersistenceError::InvalidCertificate("no certificate in chain".to_string()))?;
            let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
                .map_err(|e| PersistenceError::InvalidCertificate(format!("unparsable leaf: {}", e)))?;
            (
                parsed.validity().not_after.timestamp(),
                hex::encode(Sha256::digest(leaf.as_ref())),
            )
        };

        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| PersistenceError::InvalidCertificate(format!("unreadable key: {}", e)))?
            .ok_or_else(|| PersistenceError::InvalidCertificate("no private key found".to_string()))?;
        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
            .map_err(|e| PersistenceError::InvalidCertificate(format!("unsupported key: {}", e)))?;

        Ok(Self {
            chain_pem,
            key_pem,
            not_after,
            fingerprint,
            certified_key: Arc::new(CertifiedKey::new(certs, signing_key)),
        })
    }

    /// Parse a combined bundle as written by [`Certificate::to_bundle`].
    pub fn from_bundle(bundle: &str) -> Result<Self, PersistenceError> {
        let (chain_pem, key_pem) = split_bundle(bundle);
        Self::from_pem(chain_pem, key_pem)
    }

    /// Chain followed by the private key, the on-disk format.
    pub fn to_bundle(&self) -> String {
        let mut bundle = String::with_capacity(self.chain_pem.len() + self.key_pem.len() + 2);
        bundle.push_str(self.chain_pem.trim_end());
        bundle.push('\n');
        bundle.push_str(self.key_pem.trim_end());
        bundle.push('\n');
        bundle
    }

    pub fn chain_pem(&self) -> &str {
        &self.chain_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Expiry of the leaf certificate (Unix seconds)
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// SHA-256 of the leaf certificate, lowercase hex
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Signing material handed to rustls during the handshake
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified_key.clone()
    }

    /// ⏰ True if the certificate is still valid `margin_secs` from now
    pub fn valid_beyond(&self, margin_secs: i64) -> bool {
        self.not_after > now_unix() + margin_secs
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("not_after", &self.not_after)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Split a PEM bundle into (certificate blocks, private key block).
fn split_bundle(bundle: &str) -> (String, String) {
    let mut chain = String::new();
    let mut key = String::new();
    let mut in_key: Option<bool> = None;

    for line in bundle.lines() {
        let line = line.trim_end();
        if line.starts_with("-----BEGIN ") {
            in_key = Some(line.contains("PRIVATE KEY"));
        }
        match in_key {
            Some(true) => {
                key.push_str(line);
                key.push('\n');
            }
            Some(false) => {
                chain.push_str(line);
                chain.push('\n');
            }
            None => {}
        }
        if line.starts_with("-----END ") {
            in_key = None;
        }
    }

    (chain, key)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use rcgen::{CertificateParams, DnType, KeyPair};

    /// Self-signed certificate for `domain` expiring at `not_after` (Unix seconds)
    pub(crate) fn self_signed(domain: &str, not_after: i64) -> Certificate {
        let (chain, key) = self_signed_pem(domain, not_after);
        Certificate::from_pem(chain, key).unwrap()
    }

    pub(crate) fn self_signed_pem(domain: &str, not_after: i64) -> (String, String) {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, domain);
        params.not_before = time::OffsetDateTime::from_unix_timestamp(now_unix() - DAY_SECS).unwrap();
        params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("Example.COM"), "example.com");
        assert_eq!(normalize_domain("example.com."), "example.com");
        assert_eq!(normalize_domain(" a.example "), "a.example");
    }

    #[test]
    fn test_from_pem_reads_expiry() {
        let expires = now_unix() + 30 * DAY_SECS;
        let cert = self_signed("a.example", expires);

        assert_eq!(cert.not_after(), expires);
        assert_eq!(cert.fingerprint().len(), 64);
        assert!(cert.valid_beyond(7 * DAY_SECS));
        assert!(!cert.valid_beyond(31 * DAY_SECS));
    }

    #[test]
    fn test_bundle_keeps_chain_and_key() {
        let cert = self_signed("a.example", now_unix() + 10 * DAY_SECS);
        let restored = Certificate::from_bundle(&cert.to_bundle()).unwrap();

        assert_eq!(restored.fingerprint(), cert.fingerprint());
        assert_eq!(restored.not_after(), cert.not_after());
        assert!(restored.key_pem().contains("PRIVATE KEY"));
        assert!(!restored.chain_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let (chain, _) = self_signed_pem("a.example", now_unix() + DAY_SECS);
        let err = Certificate::from_pem(chain, "").unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Certificate::from_bundle("not a pem").is_err());
    }
}
