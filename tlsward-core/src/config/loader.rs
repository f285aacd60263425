//! Configuration loader

use crate::config::TlswardConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding `acme.storage`
pub const STORAGE_ENV: &str = "TLSWARD_STORAGE";

/// Configuration loader for various formats
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TlswardConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config = match ext {
            "json" => Self::from_json(&content)?,
            "toml" | "" => Self::from_toml(&content)?,
            _ => return Err(Error::Config(format!("Unknown config format: {}", ext))),
        };

        Self::apply_storage_override(&mut config, std::env::var_os(STORAGE_ENV).map(PathBuf::from));
        Ok(config)
    }

    /// Parse JSON configuration
    pub fn from_json(content: &str) -> Result<TlswardConfig> {
        serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid JSON: {}", e)))
    }

    /// Parse TOML configuration
    pub fn from_toml(content: &str) -> Result<TlswardConfig> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    fn apply_storage_override(config: &mut TlswardConfig, storage: Option<PathBuf>) {
        if let Some(storage) = storage.filter(|p| !p.as_os_str().is_empty()) {
            tracing::debug!("📁 Storage overridden by {}: {:?}", STORAGE_ENV, storage);
            config.acme.storage = Some(storage);
        }
    }
}
