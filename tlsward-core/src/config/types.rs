//! Configuration type definitions
//!
//! These types represent the runtime configuration for Tlsward.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration for Tlsward
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlswardConfig {
    /// ACME (certificate authority) settings
    #[serde(default)]
    pub acme: AcmeConfig,

    /// Listener addresses
    #[serde(default)]
    pub listen: ListenConfig,

    /// Host to upstream routes
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Global logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TlswardConfig {
    /// ✅ Check the configuration for mistakes that would only surface at runtime
    pub fn validate(&self) -> Result<()> {
        match self.acme.email.as_deref().map(str::trim) {
            Some(email) if email.contains('@') => {}
            Some(email) => {
                return Err(Error::Config(format!("Invalid ACME email: '{}'", email)));
            }
            None => return Err(Error::Config("acme.email is required".to_string())),
        }

        if self.acme.renewal_interval_secs == 0 {
            return Err(Error::Config(
                "acme.renewal_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.routes.is_empty() {
            return Err(Error::Config("At least one route is required".to_string()));
        }

        let mut seen = HashSet::new();
        for (i, route) in self.routes.iter().enumerate() {
            if route.hosts.is_empty() {
                return Err(Error::Config(format!("Route #{} has no hosts", i + 1)));
            }
            if route.upstream.trim().is_empty() {
                return Err(Error::Config(format!("Route #{} has no upstream", i + 1)));
            }
            for host in &route.hosts {
                let host = normalize_host(host);
                if host.is_empty() {
                    return Err(Error::Config(format!("Route #{} has an empty host", i + 1)));
                }
                if !seen.insert(host.clone()) {
                    return Err(Error::Config(format!("Host '{}' is routed twice", host)));
                }
            }
        }

        Ok(())
    }

    /// Upstream address for a requested host
    pub fn upstream_for(&self, host: &str) -> Option<&str> {
        let host = normalize_host(host);
        self.routes
            .iter()
            .find(|route| route.hosts.iter().any(|h| normalize_host(h) == host))
            .map(|route| route.upstream.as_str())
    }

    /// Every routed host, normalized
    pub fn hosts(&self) -> Vec<String> {
        self.routes
            .iter()
            .flat_map(|route| route.hosts.iter().map(|h| normalize_host(h)))
            .collect()
    }
}

/// ACME settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Account contact email
    pub email: Option<String>,

    /// Use Let's Encrypt staging (for testing)
    #[serde(default)]
    pub staging: bool,

    /// Explicit ACME directory URL, overrides `staging`
    pub directory: Option<String>,

    /// Storage directory for the account and certificates
    pub storage: Option<PathBuf>,

    /// Renewal sweep interval in seconds
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            email: None,
            staging: false,
            directory: None,
            storage: None,
            renewal_interval_secs: default_renewal_interval(),
        }
    }
}

impl AcmeConfig {
    /// Configured storage directory or `<local data dir>/tlsward`
    pub fn storage_path(&self) -> PathBuf {
        self.storage.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tlsward")
        })
    }
}

fn default_renewal_interval() -> u64 {
    12 * 60 * 60 // 12 hours
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Plain HTTP address (ACME challenges and redirects)
    #[serde(default = "default_http_addr")]
    pub http: SocketAddr,

    /// TLS address
    #[serde(default = "default_https_addr")]
    pub https: SocketAddr,

    /// Serve Prometheus metrics at `/metrics` on the HTTP listener
    #[serde(default)]
    pub metrics: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            http: default_http_addr(),
            https: default_https_addr(),
            metrics: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_https_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 443))
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Hostnames served by this route
    pub hosts: Vec<String>,

    /// Upstream `host:port` the decrypted stream is forwarded to
    pub upstream: String,
}

/// Global logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}
