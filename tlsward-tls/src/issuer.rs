//! Certificate issuance coordinator
//!
//! 📜 Obtains a certificate for one domain end to end: account bootstrap,
//! order, ownership validation, CSR, finalization and persistence. At most one
//! attempt per domain runs at a time; concurrent requests for a domain that is
//! already being worked on return immediately.

use crate::account::{Account, AccountStatus, AccountStore};
use crate::acme::{AcmeProtocolClient, OrderHandle};
use crate::certificate::{normalize_domain, Certificate, DAY_SECS};
use crate::challenge::ChallengeResponseStore;
use crate::error::{IssuanceError, PersistenceError};
use crate::metrics;
use crate::repository::CertificateRepository;
use crate::validator::{DomainOwnershipValidator, ValidatorConfig};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rcgen::{CertificateParams, DnType, KeyPair};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A certificate valid for longer than this is not reissued
pub const RENEWAL_MARGIN_SECS: i64 = 7 * DAY_SECS;

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Contact addresses for the ACME account
    pub contacts: Vec<String>,
    /// Remaining validity below which a certificate is renewed
    pub renewal_margin_secs: i64,
    pub validator: ValidatorConfig,
}

impl IssuerConfig {
    pub fn new(contacts: Vec<String>) -> Self {
        Self {
            contacts,
            renewal_margin_secs: RENEWAL_MARGIN_SECS,
            validator: ValidatorConfig::default(),
        }
    }
}

/// Result of one issuance request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceOutcome {
    /// A new certificate was obtained and stored
    Issued,
    /// The stored certificate is still valid beyond the renewal margin
    AlreadyValid,
    /// Another attempt for the domain is running
    InFlight,
}

/// 📜 Certificate issuance coordinator
pub struct CertificateIssuanceCoordinator {
    client: Arc<dyn AcmeProtocolClient>,
    accounts: AccountStore,
    repository: Arc<CertificateRepository>,
    validator: DomainOwnershipValidator,
    contacts: Vec<String>,
    renewal_margin_secs: i64,
    account: OnceCell<Account>,
    /// Domains with an attempt in progress, and when it started
    in_flight: DashMap<String, Instant>,
    shutdown: CancellationToken,
}

impl CertificateIssuanceCoordinator {
    pub fn new(
        client: Arc<dyn AcmeProtocolClient>,
        accounts: AccountStore,
        repository: Arc<CertificateRepository>,
        challenges: ChallengeResponseStore,
        config: IssuerConfig,
    ) -> Self {
        Self {
            validator: DomainOwnershipValidator::new(client.clone(), challenges, config.validator),
            client,
            accounts,
            repository,
            contacts: config.contacts,
            renewal_margin_secs: config.renewal_margin_secs,
            account: OnceCell::new(),
            in_flight: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Ensure a certificate exists for `domain`, logging instead of failing.
    pub async fn ensure_certificate(&self, domain: &str) {
        match self.try_ensure_certificate(domain).await {
            Ok(IssuanceOutcome::Issued) => {
                metrics::ISSUANCE_TOTAL.with_label_values(&["issued"]).inc();
                tracing::info!("🎉 Certificate obtained successfully for {}", domain);
            }
            Ok(IssuanceOutcome::AlreadyValid) => {
                metrics::ISSUANCE_TOTAL.with_label_values(&["already_valid"]).inc();
                tracing::debug!("📜 Certificate for {} is still valid", domain);
            }
            Ok(IssuanceOutcome::InFlight) => {
                metrics::ISSUANCE_TOTAL.with_label_values(&["in_flight"]).inc();
                tracing::debug!("⏳ Issuance for {} already in progress", domain);
            }
            Err(e) => {
                metrics::ISSUANCE_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!("❌ Certificate issuance for {} failed: {}", domain, e);
            }
        }
    }

    /// 🔐 Obtain a certificate for `domain` unless a valid one is stored.
    pub async fn try_ensure_certificate(
        &self,
        domain: &str,
    ) -> Result<IssuanceOutcome, IssuanceError> {
        let domain = normalize_domain(domain);
        self.ensure_account().await?;

        let Some(_claim) = self.claim(&domain) else {
            return Ok(IssuanceOutcome::InFlight);
        };

        if let Some(existing) = self.repository.get_certificate(&domain) {
            if existing.valid_beyond(self.renewal_margin_secs) {
                return Ok(IssuanceOutcome::AlreadyValid);
            }
            tracing::info!("🔄 Certificate for {} is due for renewal", domain);
        }

        tracing::info!("🔐 Obtain certificate for {}", domain);

        let order = self.client.create_order(&domain).await?;
        let _order_guard = OpenOrder {
            client: self.client.as_ref(),
            order: &order,
        };
        let authorizations = self.client.list_authorizations(&order).await?;
        tracing::info!(
            "✅ Order created for {}! Validating {} authorization(s)...",
            domain,
            authorizations.len()
        );

        futures::future::try_join_all(
            authorizations
                .iter()
                .map(|authorization| self.validator.validate(authorization, &self.shutdown)),
        )
        .await?;

        tracing::info!("🔧 Finalizing order and generating certificate for {}...", domain);

        let key_pair = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![domain.clone()])?;
        params.distinguished_name.push(DnType::CommonName, domain.as_str());
        let csr_der = params.serialize_request(&key_pair)?.der().to_vec();

        let chain = self.client.finalize_order(&order, &csr_der).await?;
        let certificate = Certificate::from_pem(chain, key_pair.serialize_pem())?;
        self.repository.save(certificate, &domain).await?;

        Ok(IssuanceOutcome::Issued)
    }

    /// True while an attempt for `domain` is running
    pub fn in_flight(&self, domain: &str) -> bool {
        self.in_flight.contains_key(&normalize_domain(domain))
    }

    /// 🛑 Cancel running validations and stop the renewal task
    pub fn shutdown(&self) {
        tracing::info!("🛑 Stopping certificate issuance");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 🔄 Periodically renew cached certificates that are close to expiry.
    ///
    /// Runs until [`shutdown`](Self::shutdown) is called.
    pub fn spawn_renewal_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let due = coordinator
                    .repository
                    .domains_expiring_within(coordinator.renewal_margin_secs);
                if due.is_empty() {
                    tracing::trace!("🔄 No certificates due for renewal");
                    continue;
                }

                tracing::info!("🔄 Renewing {} certificate(s)", due.len());
                for domain in due {
                    coordinator.ensure_certificate(&domain).await;
                }
            }

            tracing::debug!("🔄 Renewal task stopped");
        })
    }

    /// Account used for all orders, created or loaded once
    async fn ensure_account(&self) -> Result<&Account, IssuanceError> {
        self.account
            .get_or_try_init(|| self.bootstrap_account())
            .await
    }

    async fn bootstrap_account(&self) -> Result<Account, IssuanceError> {
        let stored = match self.accounts.load().await {
            Ok(stored) => stored,
            Err(PersistenceError::Serialization(e)) => {
                tracing::warn!("⚠️ Stored ACME account is unreadable, replacing it: {}", e);
                None
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(account) = stored {
            self.client.restore_account(&account).await?;
            match self.client.fetch_account_status().await? {
                AccountStatus::Valid => {
                    tracing::info!("👤 Using ACME account {}", account.id);
                    return Ok(account);
                }
                status => {
                    tracing::warn!(
                        "⚠️ ACME account {} is {:?}, registering a new one",
                        account.id,
                        status
                    );
                }
            }
        }

        let account = self.client.register_account(&self.contacts).await?;
        self.accounts.save(&account).await?;
        Ok(account)
    }

    fn claim(&self, domain: &str) -> Option<Claim<'_>> {
        match self.in_flight.entry(domain.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                Some(Claim {
                    table: &self.in_flight,
                    domain: domain.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for CertificateIssuanceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateIssuanceCoordinator")
            .field("account", &self.account.get().map(|a| &a.id))
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Releases a domain claim when the attempt ends, however it ends
struct Claim<'a> {
    table: &'a DashMap<String, Instant>,
    domain: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Some((_, started)) = self.table.remove(&self.domain) {
            tracing::debug!(
                "🔓 Released {} after {:?}",
                self.domain,
                started.elapsed()
            );
        }
    }
}

/// Lets the client forget an order once the attempt that created it ends
struct OpenOrder<'a> {
    client: &'a dyn AcmeProtocolClient,
    order: &'a OrderHandle,
}

impl Drop for OpenOrder<'_> {
    fn drop(&mut self) {
        self.client.abandon_order(self.order);
    }
}
