//! Error types for the certificate lifecycle engine

use std::path::PathBuf;
use thiserror::Error;

/// ACME protocol and account errors
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("🔴 ACME protocol error: {0}")]
    Protocol(String),

    #[error("👤 Account error: {0}")]
    Account(String),

    #[error("⚠️ No {challenge} challenge offered for {domain}")]
    NoChallenge { domain: String, challenge: String },

    #[error("🔍 Unknown ACME order: {0}")]
    UnknownOrder(String),

    #[error("❌ Order failed: {0}")]
    OrderFailed(String),
}

impl From<instant_acme::Error> for AcmeError {
    fn from(e: instant_acme::Error) -> Self {
        AcmeError::Protocol(e.to_string())
    }
}

/// Domain ownership validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("❌ Failed to validate ownership of domain '{domain}': {reason}")]
    Invalid { domain: String, reason: String },

    #[error("🚫 The authorization to verify domain '{0}' has been revoked")]
    Revoked(String),

    #[error("⌛ The authorization to verify domain '{0}' has expired")]
    Expired(String),

    #[error("❓ Unexpected authorization status '{status}' while validating '{domain}'")]
    Unexpected { domain: String, status: String },

    #[error("⏰ Timed out waiting for domain ownership validation of '{domain}' after {attempts} attempts")]
    TimedOut { domain: String, attempts: u32 },

    #[error("🛑 Validation of '{0}' was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Acme(#[from] AcmeError),
}

/// Disk persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("💥 IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("📦 Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("⚠️ Invalid certificate: {0}")]
    InvalidCertificate(String),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort one issuance attempt
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("🔐 ACME error: {0}")]
    Acme(#[from] AcmeError),

    #[error("🎯 Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("💾 Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("🔧 Certificate generation error: {0}")]
    CertGeneration(String),
}

impl From<rcgen::Error> for IssuanceError {
    fn from(e: rcgen::Error) -> Self {
        IssuanceError::CertGeneration(e.to_string())
    }
}
