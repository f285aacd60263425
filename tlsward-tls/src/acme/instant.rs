//! ACME protocol client for Let's Encrypt using instant-acme
//!
//! Orders live in memory between `create_order` and `finalize_order`; the
//! handles handed to the pipeline only carry their URLs.

use super::{
    AcmeProtocolClient, AuthorizationHandle, AuthorizationState, AuthorizationStatus,
    ChallengeError, ChallengeType, Http01Challenge, OrderHandle,
};
use crate::account::{Account, AccountStatus};
use crate::error::AcmeError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use instant_acme::{
    Account as AcmeAccount, AccountBuilder, AccountCredentials,
    AuthorizationStatus as AcmeAuthorizationStatus, BodyWrapper, BytesResponse,
    ChallengeType as AcmeChallengeType, HttpClient, Identifier, NewAccount, NewOrder, Order,
    OrderStatus, RetryPolicy,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Account the client acts for
struct Bound {
    account: AcmeAccount,
    contacts: Vec<String>,
}

/// 🔐 [`AcmeProtocolClient`] backed by instant-acme
pub struct InstantAcmeClient {
    directory_url: String,
    /// HTTP client for the CA, instant-acme's own when `None`
    http: Option<Arc<dyn HttpClient>>,
    bound: RwLock<Option<Arc<Bound>>>,
    /// Open orders by URL
    orders: DashMap<String, Arc<Mutex<Order>>>,
    /// Challenge URL -> order URL
    challenges: DashMap<String, String>,
}

impl InstantAcmeClient {
    /// Client for the given ACME directory
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            http: None,
            bound: RwLock::new(None),
            orders: DashMap::new(),
            challenges: DashMap::new(),
        }
    }

    /// Client reaching the directory through a custom HTTP client
    pub fn with_http_client(directory_url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            http: Some(http),
            ..Self::new(directory_url)
        }
    }

    /// Client for Let's Encrypt production or staging
    pub fn lets_encrypt(staging: bool) -> Self {
        if staging {
            tracing::info!("🧪 Using Let's Encrypt STAGING environment");
            Self::new(super::directory::LETS_ENCRYPT_STAGING)
        } else {
            tracing::info!("🏭 Using Let's Encrypt PRODUCTION environment");
            Self::new(super::directory::LETS_ENCRYPT_PRODUCTION)
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    fn account_builder(&self) -> Result<AccountBuilder, AcmeError> {
        match &self.http {
            Some(http) => Ok(AcmeAccount::builder_with_http(Box::new(SharedHttpClient(
                http.clone(),
            )))),
            None => AcmeAccount::builder().map_err(|e| {
                AcmeError::Account(format!("Failed to create account builder: {}", e))
            }),
        }
    }

    fn bound(&self) -> Result<Arc<Bound>, AcmeError> {
        self.bound
            .read()
            .clone()
            .ok_or_else(|| AcmeError::Account("no ACME account bound".to_string()))
    }

    /// Orders created and neither finalized nor abandoned yet
    pub fn open_orders(&self) -> usize {
        self.orders.len()
    }

    fn release(&self, order_url: &str) -> Option<Arc<Mutex<Order>>> {
        self.challenges.retain(|_, url| url.as_str() != order_url);
        self.orders.remove(order_url).map(|(_, entry)| entry)
    }

    fn order(&self, url: &str) -> Result<Arc<Mutex<Order>>, AcmeError> {
        self.orders
            .get(url)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AcmeError::UnknownOrder(url.to_string()))
    }
}

impl std::fmt::Debug for InstantAcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeClient")
            .field("directory_url", &self.directory_url)
            .field("has_account", &self.bound.read().is_some())
            .field("open_orders", &self.orders.len())
            .finish()
    }
}

#[async_trait]
impl AcmeProtocolClient for InstantAcmeClient {
    async fn register_account(&self, contacts: &[String]) -> Result<Account, AcmeError> {
        let contact: Vec<String> = contacts.iter().map(|c| mailto(c)).collect();
        let contact_refs: Vec<&str> = contact.iter().map(|s| s.as_str()).collect();

        tracing::info!("👤 Creating ACME account for {:?}...", contacts);

        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (account, credentials) = self
            .account_builder()?
            .create(&new_account, self.directory_url.clone(), None)
            .await
            .map_err(|e| AcmeError::Account(format!("Failed to create account: {}", e)))?;

        let key_material = serde_json::to_vec(&credentials)
            .map_err(|e| AcmeError::Account(format!("Failed to serialize credentials: {}", e)))?;
        let id = credentials_id(&key_material)?;

        *self.bound.write() = Some(Arc::new(Bound {
            account,
            contacts: contacts.to_vec(),
        }));

        tracing::info!("✅ ACME account created: {}", id);
        Ok(Account {
            id,
            contacts: contacts.to_vec(),
            key_material,
        })
    }

    async fn restore_account(&self, account: &Account) -> Result<(), AcmeError> {
        let credentials: AccountCredentials = serde_json::from_slice(&account.key_material)
            .map_err(|e| AcmeError::Account(format!("Failed to deserialize credentials: {}", e)))?;

        let restored = self
            .account_builder()?
            .from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Account(format!("Failed to restore account: {}", e)))?;

        *self.bound.write() = Some(Arc::new(Bound {
            account: restored,
            contacts: account.contacts.clone(),
        }));

        tracing::debug!("👤 Restored ACME account {}", account.id);
        Ok(())
    }

    async fn fetch_account_status(&self) -> Result<AccountStatus, AcmeError> {
        let bound = self.bound()?;
        let contact: Vec<String> = bound.contacts.iter().map(|c| mailto(c)).collect();
        let contact_refs: Vec<&str> = contact.iter().map(|s| s.as_str()).collect();

        // Posting to the account URL is answered with an error once the
        // account has been deactivated or revoked.
        match bound.account.update_contacts(&contact_refs).await {
            Ok(()) => Ok(AccountStatus::Valid),
            Err(instant_acme::Error::Api(problem)) if account_gone(problem.r#type.as_deref()) => {
                tracing::warn!("⚠️ ACME account rejected by the CA: {:?}", problem.detail);
                Ok(AccountStatus::Invalid)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_order(&self, domain: &str) -> Result<OrderHandle, AcmeError> {
        let bound = self.bound()?;
        let identifiers = [Identifier::Dns(domain.to_string())];

        tracing::info!("📝 Creating certificate order for {}...", domain);

        let order = bound
            .account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeError::OrderFailed(format!("Failed to create order: {}", e)))?;

        let url = order.url().to_string();
        self.orders.insert(url.clone(), Arc::new(Mutex::new(order)));

        Ok(OrderHandle {
            url,
            domain: domain.to_string(),
        })
    }

    async fn list_authorizations(
        &self,
        order: &OrderHandle,
    ) -> Result<Vec<AuthorizationHandle>, AcmeError> {
        let entry = self.order(&order.url)?;
        let mut acme_order = entry.lock().await;

        let mut handles = Vec::new();
        let mut authorizations = acme_order.authorizations();
        while let Some(result) = authorizations.next().await {
            let authz = result?;
            let identifier = authz.identifier();
            let domain = match &identifier.identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };
            handles.push(AuthorizationHandle {
                order_url: order.url.clone(),
                domain,
            });
        }

        Ok(handles)
    }

    async fn fetch_authorization(
        &self,
        authorization: &AuthorizationHandle,
    ) -> Result<AuthorizationState, AcmeError> {
        let entry = self.order(&authorization.order_url)?;
        let mut acme_order = entry.lock().await;

        let mut authorizations = acme_order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;
            let identifier = authz.identifier();
            let matches = match &identifier.identifier {
                Identifier::Dns(domain) => domain.eq_ignore_ascii_case(&authorization.domain),
                _ => false,
            };
            if !matches {
                continue;
            }

            // The order caches each authorization after its first fetch
            let state = authz.refresh().await?;
            let challenge_errors = state
                .challenges
                .iter()
                .filter_map(|c| c.error.as_ref())
                .map(|p| challenge_error(p.r#type.as_deref(), p.detail.as_deref(), p.status))
                .collect();

            return Ok(AuthorizationState {
                domain: authorization.domain.clone(),
                status: authorization_status(&state.status),
                challenge_errors,
            });
        }

        Err(AcmeError::Protocol(format!(
            "no authorization for {} in order {}",
            authorization.domain, authorization.order_url
        )))
    }

    async fn create_challenge(
        &self,
        authorization: &AuthorizationHandle,
        challenge_type: ChallengeType,
    ) -> Result<Http01Challenge, AcmeError> {
        let entry = self.order(&authorization.order_url)?;
        let mut acme_order = entry.lock().await;

        let acme_type = match challenge_type {
            ChallengeType::Http01 => AcmeChallengeType::Http01,
        };

        let mut authorizations = acme_order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;
            let identifier = authz.identifier();
            let matches = match &identifier.identifier {
                Identifier::Dns(domain) => domain.eq_ignore_ascii_case(&authorization.domain),
                _ => false,
            };
            if !matches {
                continue;
            }

            let challenge = authz
                .challenge(acme_type.clone())
                .ok_or_else(|| AcmeError::NoChallenge {
                    domain: authorization.domain.clone(),
                    challenge: challenge_type.to_string(),
                })?;

            let created = Http01Challenge {
                domain: authorization.domain.clone(),
                token: challenge.token.clone(),
                key_authorization: challenge.key_authorization().as_str().to_string(),
                url: challenge.url.clone(),
            };
            self.challenges
                .insert(created.url.clone(), authorization.order_url.clone());
            return Ok(created);
        }

        Err(AcmeError::NoChallenge {
            domain: authorization.domain.clone(),
            challenge: challenge_type.to_string(),
        })
    }

    async fn trigger_validation(&self, challenge: &Http01Challenge) -> Result<(), AcmeError> {
        let order_url = self
            .challenges
            .get(&challenge.url)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AcmeError::Protocol(format!("unknown challenge {}", challenge.url)))?;
        let entry = self.order(&order_url)?;
        let mut acme_order = entry.lock().await;

        let mut authorizations = acme_order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;
            let matching_type = authz
                .challenges
                .iter()
                .find(|c| c.url == challenge.url)
                .map(|c| c.r#type.clone());

            if let Some(challenge_type) = matching_type {
                if let Some(mut handle) = authz.challenge(challenge_type) {
                    handle.set_ready().await?;
                    tracing::debug!("🚀 Challenge for {} set ready", challenge.domain);
                    return Ok(());
                }
            }
        }

        Err(AcmeError::Protocol(format!(
            "challenge not found for URL: {}",
            challenge.url
        )))
    }

    async fn finalize_order(
        &self,
        order: &OrderHandle,
        csr_der: &[u8],
    ) -> Result<String, AcmeError> {
        let entry = self
            .release(&order.url)
            .ok_or_else(|| AcmeError::UnknownOrder(order.url.clone()))?;

        let mut acme_order = entry.lock().await;
        let retry_policy = RetryPolicy::default();

        tracing::info!("⏳ Waiting for order of {} to become ready...", order.domain);
        let status = acme_order.poll_ready(&retry_policy).await?;

        match status {
            OrderStatus::Ready => {
                tracing::info!("🔧 Finalizing order for {}...", order.domain);
                acme_order.finalize_csr(csr_der).await?;
            }
            OrderStatus::Valid => {}
            other => {
                return Err(AcmeError::OrderFailed(format!(
                    "Order status is {:?} (not Ready or Valid)",
                    other
                )));
            }
        }

        tracing::info!("⏳ Waiting for certificate issuance...");
        let chain = acme_order.poll_certificate(&retry_policy).await?;

        Ok(chain)
    }

    fn abandon_order(&self, order: &OrderHandle) {
        if self.release(&order.url).is_some() {
            tracing::debug!("🗑️ Abandoned order for {}", order.domain);
        }
    }
}

/// Hands one shared HTTP client to every account builder
struct SharedHttpClient(Arc<dyn HttpClient>);

impl HttpClient for SharedHttpClient {
    fn request(
        &self,
        req: http::Request<BodyWrapper<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<BytesResponse, instant_acme::Error>> + Send>> {
        self.0.request(req)
    }
}

fn mailto(contact: &str) -> String {
    if contact.starts_with("mailto:") {
        contact.to_string()
    } else {
        format!("mailto:{}", contact)
    }
}

/// Account URL stored in serialized credentials
fn credentials_id(credentials: &[u8]) -> Result<String, AcmeError> {
    #[derive(Deserialize)]
    struct IdInfo {
        id: String,
    }

    serde_json::from_slice::<IdInfo>(credentials)
        .map(|info| info.id)
        .map_err(|e| AcmeError::Account(format!("Failed to read account id: {}", e)))
}

fn account_gone(problem_type: Option<&str>) -> bool {
    matches!(
        problem_type,
        Some("urn:ietf:params:acme:error:unauthorized")
            | Some("urn:ietf:params:acme:error:accountDoesNotExist")
    )
}

fn authorization_status(status: &AcmeAuthorizationStatus) -> AuthorizationStatus {
    match status {
        AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
        AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
        AcmeAuthorizationStatus::Invalid => AuthorizationStatus::Invalid,
        AcmeAuthorizationStatus::Revoked => AuthorizationStatus::Revoked,
        AcmeAuthorizationStatus::Expired => AuthorizationStatus::Expired,
        AcmeAuthorizationStatus::Deactivated => AuthorizationStatus::Deactivated,
    }
}

fn challenge_error(kind: Option<&str>, detail: Option<&str>, status: Option<u16>) -> ChallengeError {
    ChallengeError {
        kind: kind.unwrap_or("about:blank").to_string(),
        detail: detail.unwrap_or_default().to_string(),
        status,
    }
}
