//! Scripted ACME client for pipeline tests

use super::{
    AcmeProtocolClient, AuthorizationHandle, AuthorizationState, AuthorizationStatus,
    ChallengeError, ChallengeType, Http01Challenge, OrderHandle,
};
use crate::account::{Account, AccountStatus};
use crate::certificate::testing::self_signed_pem;
use crate::certificate::{now_unix, DAY_SECS};
use crate::challenge::ChallengeResponseStore;
use crate::error::AcmeError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

pub(crate) const TOKEN: &str = "mock-token";
pub(crate) const KEY_AUTHORIZATION: &str = "mock-token.thumbprint";

pub(crate) struct MockAcmeClient {
    /// Authorization statuses returned in order; the last one repeats
    statuses: Mutex<VecDeque<AuthorizationStatus>>,
    /// Identifiers of the authorizations attached to each order, the order's
    /// domain alone when empty
    authorizations: Vec<String>,
    /// Status scripts of single authorizations, overriding `statuses`
    scripts: Mutex<HashMap<String, VecDeque<AuthorizationStatus>>>,
    /// Orders neither finalized nor abandoned
    open: Mutex<HashSet<String>>,
    challenge_errors: Vec<ChallengeError>,
    account_status: AccountStatus,
    finalize_delay: Duration,
    /// Store checked when validation is triggered
    store: Option<ChallengeResponseStore>,
    pub published_before_trigger: AtomicBool,
    pub registrations: AtomicU32,
    pub restores: AtomicU32,
    pub orders: AtomicU32,
    pub fetches: AtomicU32,
    pub triggers: AtomicU32,
    pub finalizes: AtomicU32,
}

impl MockAcmeClient {
    pub(crate) fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            authorizations: Vec::new(),
            scripts: Mutex::new(HashMap::new()),
            open: Mutex::new(HashSet::new()),
            challenge_errors: Vec::new(),
            account_status: AccountStatus::Valid,
            finalize_delay: Duration::ZERO,
            store: None,
            published_before_trigger: AtomicBool::new(false),
            registrations: AtomicU32::new(0),
            restores: AtomicU32::new(0),
            orders: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
            triggers: AtomicU32::new(0),
            finalizes: AtomicU32::new(0),
        }
    }

    pub(crate) fn with_statuses(mut self, statuses: Vec<AuthorizationStatus>) -> Self {
        self.statuses = Mutex::new(statuses.into());
        self
    }

    /// Attach an authorization for `identifier` with its own status script
    pub(crate) fn with_authorization(
        mut self,
        identifier: &str,
        statuses: Vec<AuthorizationStatus>,
    ) -> Self {
        self.authorizations.push(identifier.to_string());
        self.scripts.get_mut().insert(identifier.to_string(), statuses.into());
        self
    }

    pub(crate) fn with_challenge_errors(mut self, errors: Vec<ChallengeError>) -> Self {
        self.challenge_errors = errors;
        self
    }

    pub(crate) fn with_account_status(mut self, status: AccountStatus) -> Self {
        self.account_status = status;
        self
    }

    pub(crate) fn with_finalize_delay(mut self, delay: Duration) -> Self {
        self.finalize_delay = delay;
        self
    }

    pub(crate) fn watching(mut self, store: ChallengeResponseStore) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn open_orders(&self) -> usize {
        self.open.lock().len()
    }

    fn next_status(&self, identifier: &str) -> AuthorizationStatus {
        if let Some(script) = self.scripts.lock().get_mut(identifier) {
            return advance(script);
        }
        advance(&mut self.statuses.lock())
    }
}

#[async_trait]
impl AcmeProtocolClient for MockAcmeClient {
    async fn register_account(&self, contacts: &[String]) -> Result<Account, AcmeError> {
        let n = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Account {
            id: format!("https://acme.test/acct/{}", n),
            contacts: contacts.to_vec(),
            key_material: vec![n as u8],
        })
    }

    async fn restore_account(&self, _account: &Account) -> Result<(), AcmeError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_account_status(&self) -> Result<AccountStatus, AcmeError> {
        Ok(self.account_status.clone())
    }

    async fn create_order(&self, domain: &str) -> Result<OrderHandle, AcmeError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        let url = format!("https://acme.test/order/{}", n);
        self.open.lock().insert(url.clone());
        Ok(OrderHandle {
            url,
            domain: domain.to_string(),
        })
    }

    async fn list_authorizations(
        &self,
        order: &OrderHandle,
    ) -> Result<Vec<AuthorizationHandle>, AcmeError> {
        let identifiers = if self.authorizations.is_empty() {
            vec![order.domain.clone()]
        } else {
            self.authorizations.clone()
        };
        Ok(identifiers
            .into_iter()
            .map(|domain| AuthorizationHandle {
                order_url: order.url.clone(),
                domain,
            })
            .collect())
    }

    async fn fetch_authorization(
        &self,
        authorization: &AuthorizationHandle,
    ) -> Result<AuthorizationState, AcmeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(AuthorizationState {
            domain: authorization.domain.clone(),
            status: self.next_status(&authorization.domain),
            challenge_errors: self.challenge_errors.clone(),
        })
    }

    async fn create_challenge(
        &self,
        authorization: &AuthorizationHandle,
        _challenge_type: ChallengeType,
    ) -> Result<Http01Challenge, AcmeError> {
        Ok(Http01Challenge {
            domain: authorization.domain.clone(),
            token: TOKEN.to_string(),
            key_authorization: KEY_AUTHORIZATION.to_string(),
            url: format!("{}/chall", authorization.order_url),
        })
    }

    async fn trigger_validation(&self, _challenge: &Http01Challenge) -> Result<(), AcmeError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        if let Some(store) = &self.store {
            let published = store.get(TOKEN).as_deref() == Some(KEY_AUTHORIZATION);
            self.published_before_trigger.store(published, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn finalize_order(
        &self,
        order: &OrderHandle,
        _csr_der: &[u8],
    ) -> Result<String, AcmeError> {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
        if !self.finalize_delay.is_zero() {
            tokio::time::sleep(self.finalize_delay).await;
        }
        self.open.lock().remove(&order.url);
        let (chain, _) = self_signed_pem(&order.domain, now_unix() + 90 * DAY_SECS);
        Ok(chain)
    }

    fn abandon_order(&self, order: &OrderHandle) {
        self.open.lock().remove(&order.url);
    }
}

fn advance(statuses: &mut VecDeque<AuthorizationStatus>) -> AuthorizationStatus {
    if statuses.len() > 1 {
        statuses.pop_front().unwrap_or(AuthorizationStatus::Valid)
    } else {
        statuses.front().cloned().unwrap_or(AuthorizationStatus::Valid)
    }
}
