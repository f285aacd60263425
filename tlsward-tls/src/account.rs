//! ACME account record and its persistence
//!
//! 👤 The account is created once per deployment and reused across restarts.
//! It lives in `<storage>/account.json`.

use crate::error::PersistenceError;
use crate::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Account file name inside the storage directory
pub const ACCOUNT_FILE: &str = "account.json";

/// 👤 Registered ACME account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account URL assigned by the CA
    pub id: String,
    /// Contact email addresses (at least one)
    pub contacts: Vec<String>,
    /// Key material in the encoding of the protocol client that created it
    #[serde(with = "base64_bytes")]
    pub key_material: Vec<u8>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("contacts", &self.contacts)
            .field("key_material", &format_args!("<{} bytes>", self.key_material.len()))
            .finish()
    }
}

/// Account state as reported by the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStatus {
    Valid,
    Invalid,
    Other(String),
}

/// 💾 File-backed account persistence
#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    /// Store rooted at the given storage directory
    pub fn new(storage_dir: impl AsRef<Path>) -> Self {
        Self {
            path: storage_dir.as_ref().join(ACCOUNT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 📂 Load the stored account, `None` if none has been saved yet
    pub async fn load(&self) -> Result<Option<Account>, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("👤 No stored ACME account at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        let account: Account = serde_json::from_str(&content)?;
        tracing::debug!("👤 Loaded ACME account {}", account.id);
        Ok(Some(account))
    }

    /// 💾 Persist the account, replacing any stored one
    pub async fn save(&self, account: &Account) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(account)?;
        write_atomic(&self.path, &json).await?;
        tracing::info!("💾 Saved ACME account {} to {:?}", account.id, self.path);
        Ok(())
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
