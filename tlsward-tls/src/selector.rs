//! SNI certificate selection
//!
//! ⚡ Runs inside the TLS handshake, so it only ever reads the in-memory cache.
//! Missing or soon-expiring certificates are requested in the background and
//! picked up by later handshakes.

use crate::certificate::{normalize_domain, Certificate, DAY_SECS};
use crate::issuer::CertificateIssuanceCoordinator;
use crate::metrics;
use crate::repository::CertificateRepository;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Certificates closer than this to expiry trigger a background renewal
pub const SELECTION_RENEWAL_MARGIN_SECS: i64 = 5 * DAY_SECS;

/// 🎯 Certificate selector for incoming handshakes
pub struct CertificateSelector {
    repository: Arc<CertificateRepository>,
    coordinator: Arc<CertificateIssuanceCoordinator>,
    runtime: Handle,
    /// Hosts certificates may be requested for, any host if `None`
    allowed_hosts: Option<HashSet<String>>,
}

impl CertificateSelector {
    /// Selector spawning issuance work on `runtime`
    pub fn new(
        repository: Arc<CertificateRepository>,
        coordinator: Arc<CertificateIssuanceCoordinator>,
        runtime: Handle,
    ) -> Self {
        Self {
            repository,
            coordinator,
            runtime,
            allowed_hosts: None,
        }
    }

    /// Only request certificates for the given hosts
    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_hosts = Some(hosts.into_iter().map(|h| normalize_domain(h.as_ref())).collect());
        self
    }

    /// Cached certificate for `domain`.
    ///
    /// Never blocks. When the certificate is missing or expires within five
    /// days, issuance is started in the background and the current cache
    /// content is returned as is.
    pub fn select(&self, domain: &str) -> Option<Arc<Certificate>> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return None;
        }

        let cached = self.repository.get_certificate(&domain);
        let fresh = cached
            .as_ref()
            .is_some_and(|cert| cert.valid_beyond(SELECTION_RENEWAL_MARGIN_SECS));

        if !fresh {
            self.request_issuance(&domain);
        }

        let result = match (&cached, fresh) {
            (Some(_), true) => "hit",
            (Some(_), false) => "stale",
            (None, _) => "miss",
        };
        metrics::SELECTIONS_TOTAL.with_label_values(&[result]).inc();

        cached
    }

    fn request_issuance(&self, domain: &str) {
        if let Some(allowed) = &self.allowed_hosts {
            if !allowed.contains(domain) {
                tracing::debug!("🚫 Not requesting a certificate for unknown host {}", domain);
                return;
            }
        }
        if self.coordinator.is_shutdown() || self.coordinator.in_flight(domain) {
            return;
        }

        tracing::info!("🔐 Requesting certificate for {} in the background", domain);
        let coordinator = Arc::clone(&self.coordinator);
        let domain = domain.to_string();
        self.runtime.spawn(async move {
            coordinator.ensure_certificate(&domain).await;
        });
    }
}

impl ResolvesServerCert for CertificateSelector {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(server_name) = client_hello.server_name() else {
            tracing::debug!("⚠️ Handshake without SNI, no certificate to offer");
            return None;
        };
        self.select(server_name).map(|cert| cert.certified_key())
    }
}

impl std::fmt::Debug for CertificateSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateSelector")
            .field("repository", &self.repository)
            .field("allowed_hosts", &self.allowed_hosts)
            .finish()
    }
}
