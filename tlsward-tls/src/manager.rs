//! TLS Manager
//!
//! 🛡️ Wires the certificate lifecycle engine together: repository, challenge
//! store, issuance coordinator, SNI selector and the renewal task.

use crate::account::AccountStore;
use crate::acme::{directory, AcmeProtocolClient, InstantAcmeClient};
use crate::challenge::{ChallengeResponseStore, Http01Responder};
use crate::issuer::{CertificateIssuanceCoordinator, IssuerConfig};
use crate::metrics;
use crate::repository::CertificateRepository;
use crate::selector::CertificateSelector;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// ⚙️ Configuration for automatic TLS
#[derive(Debug, Clone)]
pub struct AutoTlsConfig {
    /// Directory holding the account and certificates
    pub storage: PathBuf,
    /// Account contact addresses
    pub contacts: Vec<String>,
    /// ACME directory URL
    pub directory_url: String,
    /// Automatic renewal check interval
    pub renewal_interval: Duration,
    /// Hosts certificates may be requested for, any host if `None`
    pub allowed_hosts: Option<Vec<String>>,
}

impl AutoTlsConfig {
    /// Default storage location (`<local data dir>/tlsward`)
    pub fn default_storage() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tlsward")
    }
}

impl Default for AutoTlsConfig {
    fn default() -> Self {
        Self {
            storage: Self::default_storage(),
            contacts: Vec::new(),
            directory_url: directory::LETS_ENCRYPT_PRODUCTION.to_string(),
            renewal_interval: Duration::from_secs(12 * 60 * 60), // 12 hours
            allowed_hosts: None,
        }
    }
}

/// 🛡️ TLS Manager for Tlsward
pub struct TlsManager {
    config: AutoTlsConfig,
    challenges: ChallengeResponseStore,
    repository: Arc<CertificateRepository>,
    coordinator: Arc<CertificateIssuanceCoordinator>,
    selector: Arc<CertificateSelector>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl TlsManager {
    /// Manager talking to the configured ACME directory through instant-acme
    pub fn new(config: AutoTlsConfig, runtime: Handle) -> Self {
        let client = Arc::new(InstantAcmeClient::new(config.directory_url.clone()));
        Self::with_client(config, client, runtime)
    }

    /// Manager using a specific protocol client
    pub fn with_client(
        config: AutoTlsConfig,
        client: Arc<dyn AcmeProtocolClient>,
        runtime: Handle,
    ) -> Self {
        tracing::info!("🔐 Initializing TLS manager (directory: {})", config.directory_url);
        tracing::info!("📧 Account contacts: {:?}", config.contacts);

        let challenges = ChallengeResponseStore::new();
        let repository = Arc::new(CertificateRepository::new(&config.storage));
        let coordinator = Arc::new(CertificateIssuanceCoordinator::new(
            client,
            AccountStore::new(&config.storage),
            repository.clone(),
            challenges.clone(),
            IssuerConfig::new(config.contacts.clone()),
        ));

        let mut selector = CertificateSelector::new(repository.clone(), coordinator.clone(), runtime);
        if let Some(hosts) = &config.allowed_hosts {
            selector = selector.with_allowed_hosts(hosts);
        }

        Self {
            config,
            challenges,
            repository,
            coordinator,
            selector: Arc::new(selector),
            renewal: Mutex::new(None),
        }
    }

    /// 🚀 Load stored certificates and start the renewal task.
    ///
    /// Returns the number of domains with a usable certificate.
    pub async fn init(&self) -> usize {
        metrics::init();
        let loaded = self.repository.initialize().await;

        tracing::info!(
            "🔄 Starting certificate renewal task (interval: {:?})",
            self.config.renewal_interval
        );
        let handle = self.coordinator.spawn_renewal_task(self.config.renewal_interval);
        if let Some(previous) = self.renewal.lock().replace(handle) {
            previous.abort();
        }

        loaded
    }

    /// Certificate resolver for the TLS server configuration
    pub fn selector(&self) -> Arc<CertificateSelector> {
        self.selector.clone()
    }

    /// Responder for `/.well-known/acme-challenge/` requests
    pub fn responder(&self) -> Http01Responder {
        Http01Responder::new(self.challenges.clone())
    }

    pub fn coordinator(&self) -> Arc<CertificateIssuanceCoordinator> {
        self.coordinator.clone()
    }

    pub fn repository(&self) -> Arc<CertificateRepository> {
        self.repository.clone()
    }

    pub fn config(&self) -> &AutoTlsConfig {
        &self.config
    }

    /// 🛑 Cancel running validations and wait for the renewal task to stop
    pub async fn shutdown(&self) {
        self.coordinator.shutdown();
        let handle = self.renewal.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("⚠️ Renewal task ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for TlsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsManager")
            .field("config", &self.config)
            .field("repository", &self.repository)
            .finish()
    }
}
