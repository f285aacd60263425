//! ACME protocol client abstraction
//!
//! 🔐 The issuance pipeline talks to the CA only through [`AcmeProtocolClient`],
//! so the protocol implementation can be swapped (the production adapter
//! lives in [`instant`]) and the pipeline can be exercised against a scripted
//! client in tests.

#[cfg(test)]
pub(crate) mod fake_ca;
pub mod instant;
#[cfg(test)]
pub(crate) mod mock;

pub use instant::InstantAcmeClient;

use crate::account::{Account, AccountStatus};
use crate::error::AcmeError;
use async_trait::async_trait;

/// ACME directory URLs
pub mod directory {
    /// 🏭 Let's Encrypt Production - for real certificates
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
    /// 🧪 Let's Encrypt Staging - for testing (not trusted)
    pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
}

/// ACME challenge types supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    /// 🌐 HTTP-01 challenge (port 80)
    Http01,
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeType::Http01 => f.write_str("http-01"),
        }
    }
}

/// Reference to an order created on the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    /// Order URL, unique per order
    pub url: String,
    /// Domain the order was created for
    pub domain: String,
}

/// Reference to one authorization of an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHandle {
    /// URL of the order the authorization belongs to
    pub order_url: String,
    /// Identifier (domain) being authorized
    pub domain: String,
}

/// Authorization status as reported by the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Revoked,
    Expired,
    Deactivated,
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Invalid => "invalid",
            AuthorizationStatus::Revoked => "revoked",
            AuthorizationStatus::Expired => "expired",
            AuthorizationStatus::Deactivated => "deactivated",
        };
        f.write_str(s)
    }
}

/// Problem reported by the CA for a failed challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeError {
    /// Problem type URN
    pub kind: String,
    pub detail: String,
    /// HTTP status code attached to the problem
    pub status: Option<u16>,
}

impl std::fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}: {}, Code = {}", self.kind, self.detail, status),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// Snapshot of an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState {
    pub domain: String,
    pub status: AuthorizationStatus,
    /// Problems attached to the authorization's challenges
    pub challenge_errors: Vec<ChallengeError>,
}

/// HTTP-01 challenge to be answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http01Challenge {
    pub domain: String,
    /// Token the CA requests under `/.well-known/acme-challenge/`
    pub token: String,
    /// Body the CA expects for the token
    pub key_authorization: String,
    /// Challenge URL, used to notify the CA
    pub url: String,
}

/// 🔐 Operations the issuance pipeline needs from an ACME implementation.
///
/// `register_account` and `restore_account` bind the client to an account;
/// every later call acts on behalf of that account.
#[async_trait]
pub trait AcmeProtocolClient: Send + Sync {
    /// 👤 Register a new account with the given contacts and bind to it
    async fn register_account(&self, contacts: &[String]) -> Result<Account, AcmeError>;

    /// Bind to a previously registered account
    async fn restore_account(&self, account: &Account) -> Result<(), AcmeError>;

    /// Status of the bound account as the CA sees it
    async fn fetch_account_status(&self) -> Result<AccountStatus, AcmeError>;

    /// 📝 Create an order for a single domain
    async fn create_order(&self, domain: &str) -> Result<OrderHandle, AcmeError>;

    /// Authorizations the CA attached to an order
    async fn list_authorizations(
        &self,
        order: &OrderHandle,
    ) -> Result<Vec<AuthorizationHandle>, AcmeError>;

    /// Current state of an authorization
    async fn fetch_authorization(
        &self,
        authorization: &AuthorizationHandle,
    ) -> Result<AuthorizationState, AcmeError>;

    /// Challenge of the requested type for an authorization
    async fn create_challenge(
        &self,
        authorization: &AuthorizationHandle,
        challenge_type: ChallengeType,
    ) -> Result<Http01Challenge, AcmeError>;

    /// 🚀 Ask the CA to validate a challenge
    async fn trigger_validation(&self, challenge: &Http01Challenge) -> Result<(), AcmeError>;

    /// 🔧 Submit the CSR (DER) and return the issued PEM chain, leaf first
    async fn finalize_order(&self, order: &OrderHandle, csr_der: &[u8])
        -> Result<String, AcmeError>;

    /// Drop whatever the client keeps for an order that ends without being
    /// finalized. Must not block; it runs when an issuance attempt is dropped.
    fn abandon_order(&self, order: &OrderHandle);
}
