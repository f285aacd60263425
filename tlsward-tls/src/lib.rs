//! Tlsward TLS Module
//!
//! Certificate lifecycle engine:
//! - ACME account bootstrap and per-domain issuance (Let's Encrypt)
//! - HTTP-01 domain ownership validation
//! - Certificate storage with expiry-aware eviction
//! - Non-blocking SNI certificate selection

pub mod account;
pub mod acme;
pub mod certificate;
pub mod challenge;
pub mod error;
pub mod issuer;
pub mod manager;
pub mod metrics;
pub mod repository;
pub mod selector;
pub mod validator;

mod persist;

pub use account::{Account, AccountStatus, AccountStore};
pub use acme::{AcmeProtocolClient, InstantAcmeClient};
pub use certificate::Certificate;
pub use challenge::{ChallengeResponseStore, Http01Responder, ACME_CHALLENGE_PREFIX};
pub use error::{AcmeError, IssuanceError, PersistenceError, ValidationError};
pub use issuer::{CertificateIssuanceCoordinator, IssuanceOutcome, IssuerConfig};
pub use manager::{AutoTlsConfig, TlsManager};
pub use repository::CertificateRepository;
pub use selector::CertificateSelector;
pub use validator::{DomainOwnershipValidator, ValidatorConfig};
