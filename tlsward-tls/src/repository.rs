//! Certificate repository
//!
//! 🗄️ On-disk and in-memory store of issued certificates, keeping exactly one
//! certificate per domain: the one that stays valid the longest.
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── certs/
//!     ├── example.com_<sha256 of leaf>.pem    # chain + private key
//!     └── www.example.com_<sha256 of leaf>.pem
//! ```
//!
//! The handshake path only reads the in-memory cache; disk is touched at
//! startup and when a newly issued certificate is saved.

use crate::certificate::{normalize_domain, Certificate, DAY_SECS};
use crate::error::PersistenceError;
use crate::persist::{write_atomic, TMP_EXTENSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Certificate directory name inside the storage directory
pub const CERTS_DIR: &str = "certs";

/// Certificates closer than this to expiry are treated as absent
pub const MIN_REMAINING_VALIDITY_SECS: i64 = DAY_SECS;

const BUNDLE_EXTENSION: &str = "pem";

/// 🗄️ Certificate repository
pub struct CertificateRepository {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Certificate>>>,
}

impl CertificateRepository {
    /// Repository rooted at the given storage directory
    pub fn new(storage_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: storage_dir.as_ref().join(CERTS_DIR),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Directory holding the certificate bundles
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 🚀 Load the best certificate per domain and prune everything else.
    ///
    /// For every domain on disk the valid certificate with the latest expiry is
    /// cached; all other files of that domain are deleted, including every file
    /// of a domain that has no valid certificate left, and temp files left by
    /// an interrupted save. Problems with single files are logged and skipped.
    /// Returns the number of cached domains.
    pub async fn initialize(&self) -> usize {
        tracing::info!("📁 Initializing certificate repository at {:?}", self.dir);

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::error!("❌ Cannot create certificate directory {:?}: {}", self.dir, e);
            return 0;
        }

        let mut removed = self.remove_leftover_temp_files().await;

        let mut by_domain: HashMap<String, Vec<(PathBuf, Option<Certificate>)>> = HashMap::new();
        for (path, domain) in self.list_files().await {
            let certificate = match tokio::fs::read_to_string(&path).await {
                Ok(bundle) => match Certificate::from_bundle(&bundle) {
                    Ok(cert) => Some(cert),
                    Err(e) => {
                        tracing::warn!("⚠️ Discarding unreadable certificate {:?}: {}", path, e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("⚠️ Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            by_domain.entry(domain).or_default().push((path, certificate));
        }

        let mut loaded = HashMap::new();

        for (domain, files) in by_domain {
            let best = files
                .iter()
                .filter_map(|(path, cert)| cert.as_ref().map(|c| (path, c)))
                .filter(|(_, cert)| cert.valid_beyond(MIN_REMAINING_VALIDITY_SECS))
                .max_by_key(|(_, cert)| cert.not_after())
                .map(|(path, _)| path.clone());

            for (path, cert) in files {
                if Some(&path) == best.as_ref() {
                    if let Some(cert) = cert {
                        loaded.insert(domain.clone(), Arc::new(cert));
                    }
                    continue;
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        removed += 1;
                        tracing::debug!("🗑️ Removed superseded certificate {:?}", path);
                    }
                    Err(e) => tracing::warn!("⚠️ Failed to remove {:?}: {}", path, e),
                }
            }
        }

        let count = loaded.len();
        *self.cache.write() = loaded;

        tracing::info!(
            "📜 Loaded {} certificate(s) from disk, removed {} stale file(s)",
            count,
            removed
        );
        count
    }

    /// 🔍 Cached certificate for a domain.
    ///
    /// Memory only. Certificates within a day of expiry are not returned.
    pub fn get_certificate(&self, domain: &str) -> Option<Arc<Certificate>> {
        let domain = normalize_domain(domain);
        self.cache
            .read()
            .get(&domain)
            .filter(|cert| cert.valid_beyond(MIN_REMAINING_VALIDITY_SECS))
            .cloned()
    }

    /// 💾 Persist a newly issued certificate and make it the cached one.
    ///
    /// The previous certificate for the domain is replaced unconditionally and
    /// its file removed. A failed write leaves the cache untouched.
    pub async fn save(
        &self,
        certificate: Certificate,
        domain: &str,
    ) -> Result<Arc<Certificate>, PersistenceError> {
        let domain = normalize_domain(domain);
        let path = self.dir.join(bundle_file_name(&domain, certificate.fingerprint()));

        tracing::info!("💾 Storing certificate for {} at {:?}", domain, path);
        write_atomic(&path, certificate.to_bundle().as_bytes()).await?;

        let certificate = Arc::new(certificate);
        self.cache.write().insert(domain.clone(), certificate.clone());

        for (other, other_domain) in self.list_files().await {
            if other_domain == domain && other != path {
                if let Err(e) = tokio::fs::remove_file(&other).await {
                    tracing::warn!("⚠️ Failed to remove superseded {:?}: {}", other, e);
                }
            }
        }

        tracing::info!(
            "✅ Certificate stored for {} (expires at {})",
            domain,
            certificate.not_after()
        );
        Ok(certificate)
    }

    /// ⏰ Cached domains whose certificate expires within `margin_secs`
    pub fn domains_expiring_within(&self, margin_secs: i64) -> Vec<String> {
        self.cache
            .read()
            .iter()
            .filter(|(_, cert)| !cert.valid_beyond(margin_secs))
            .map(|(domain, _)| domain.clone())
            .collect()
    }

    /// Number of cached domains
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Certificate bundles on disk with the domain encoded in their name
    async fn list_files(&self) -> Vec<(PathBuf, String)> {
        self.read_dir()
            .await
            .into_iter()
            .filter_map(|path| parse_bundle_file_name(&path).map(|domain| (path, domain)))
            .collect()
    }

    async fn remove_leftover_temp_files(&self) -> usize {
        let mut removed = 0;
        for path in self.read_dir().await {
            if path.extension().is_none_or(|ext| ext != TMP_EXTENSION) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!("🗑️ Removed leftover temp file {:?}", path);
                }
                Err(e) => tracing::warn!("⚠️ Failed to remove {:?}: {}", path, e),
            }
        }
        removed
    }

    async fn read_dir(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("⚠️ Cannot read certificate directory {:?}: {}", self.dir, e);
                return files;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => files.push(entry.path()),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("⚠️ Error while listing {:?}: {}", self.dir, e);
                    break;
                }
            }
        }

        files
    }
}

impl std::fmt::Debug for CertificateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRepository")
            .field("dir", &self.dir)
            .field("cached", &self.len())
            .finish()
    }
}

fn bundle_file_name(domain: &str, fingerprint: &str) -> String {
    format!("{}_{}.{}", domain, fingerprint, BUNDLE_EXTENSION)
}

/// Domain part of `<domain>_<id>.pem`
fn parse_bundle_file_name(path: &Path) -> Option<String> {
    if path.extension()? != BUNDLE_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (domain, id) = stem.rsplit_once('_')?;
    if domain.is_empty() || id.is_empty() {
        return None;
    }
    Some(normalize_domain(domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::now_unix;
    use crate::certificate::testing::{self_signed, self_signed_pem};

    fn write_bundle(dir: &Path, domain: &str, cert: &Certificate) -> PathBuf {
        let path = dir.join(CERTS_DIR).join(bundle_file_name(domain, cert.fingerprint()));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, cert.to_bundle()).unwrap();
        path
    }

    #[test]
    fn test_parse_bundle_file_name() {
        assert_eq!(
            parse_bundle_file_name(Path::new("/x/A.Example_abc.pem")),
            Some("a.example".to_string())
        );
        assert_eq!(parse_bundle_file_name(Path::new("/x/a.example_abc.pem.tmp")), None);
        assert_eq!(parse_bundle_file_name(Path::new("/x/noid.pem")), None);
        assert_eq!(parse_bundle_file_name(Path::new("/x/notes.txt")), None);
    }

    #[tokio::test]
    async fn test_initialize_keeps_latest_valid_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = now_unix() + 10 * DAY_SECS;
        let t2 = now_unix() + 60 * DAY_SECS;

        let older = self_signed("a.example", t1);
        let newer = self_signed("a.example", t2);
        let expired = self_signed("b.example", now_unix() - DAY_SECS);

        let older_path = write_bundle(dir.path(), "a.example", &older);
        let newer_path = write_bundle(dir.path(), "a.example", &newer);
        let expired_path = write_bundle(dir.path(), "b.example", &expired);

        let repo = CertificateRepository::new(dir.path());
        assert_eq!(repo.initialize().await, 1);

        let cached = repo.get_certificate("a.example").unwrap();
        assert_eq!(cached.not_after(), t2);
        assert!(repo.get_certificate("b.example").is_none());
        assert_eq!(repo.len(), 1);

        assert!(newer_path.exists());
        assert!(!older_path.exists());
        assert!(!expired_path.exists());
    }

    #[tokio::test]
    async fn test_initialize_discards_nearly_expired_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let soon = self_signed("c.example", now_unix() + DAY_SECS / 2);
        let soon_path = write_bundle(dir.path(), "c.example", &soon);

        let corrupt_path = dir.path().join(CERTS_DIR).join("d.example_deadbeef.pem");
        std::fs::write(&corrupt_path, "garbage").unwrap();
        let unrelated = dir.path().join(CERTS_DIR).join("README.txt");
        std::fs::write(&unrelated, "keep me").unwrap();

        let repo = CertificateRepository::new(dir.path());
        assert_eq!(repo.initialize().await, 0);

        assert!(repo.is_empty());
        assert!(!soon_path.exists());
        assert!(!corrupt_path.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_initialize_removes_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed("a.example", now_unix() + 30 * DAY_SECS);
        let kept = write_bundle(dir.path(), "a.example", &cert);
        let leftover = dir
            .path()
            .join(CERTS_DIR)
            .join(format!("a.example_{}.pem.tmp", "0".repeat(64)));
        std::fs::write(&leftover, "half written").unwrap();

        let repo = CertificateRepository::new(dir.path());
        assert_eq!(repo.initialize().await, 1);

        assert!(kept.exists());
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn test_initialize_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CertificateRepository::new(dir.path().join("fresh"));

        assert_eq!(repo.initialize().await, 0);
        assert!(repo.dir().is_dir());
    }

    #[tokio::test]
    async fn test_save_then_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CertificateRepository::new(dir.path());
        let expires = now_unix() + 90 * DAY_SECS;

        let (chain, key) = self_signed_pem("a.example", expires);
        let cert = Certificate::from_pem(chain, key).unwrap();
        let fingerprint = cert.fingerprint().to_string();
        repo.save(cert, "A.Example").await.unwrap();

        let cached = repo.get_certificate("a.example").unwrap();
        assert_eq!(cached.not_after(), expires);
        assert_eq!(cached.fingerprint(), fingerprint);
        assert!(repo
            .dir()
            .join(format!("a.example_{}.pem", fingerprint))
            .exists());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CertificateRepository::new(dir.path());

        let first = self_signed("a.example", now_unix() + 80 * DAY_SECS);
        let first_path = repo.dir().join(bundle_file_name("a.example", first.fingerprint()));
        repo.save(first, "a.example").await.unwrap();

        let second = self_signed("a.example", now_unix() + 20 * DAY_SECS);
        let second_fp = second.fingerprint().to_string();
        repo.save(second, "a.example").await.unwrap();

        assert_eq!(repo.get_certificate("a.example").unwrap().fingerprint(), second_fp);
        assert!(!first_path.exists());

        let reloaded = CertificateRepository::new(dir.path());
        assert_eq!(reloaded.initialize().await, 1);
        assert_eq!(reloaded.get_certificate("a.example").unwrap().fingerprint(), second_fp);
    }

    #[tokio::test]
    async fn test_save_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("storage");
        std::fs::write(&blocker, "not a directory").unwrap();

        let repo = CertificateRepository::new(&blocker);
        let cert = self_signed("a.example", now_unix() + 30 * DAY_SECS);

        assert!(matches!(
            repo.save(cert, "a.example").await,
            Err(PersistenceError::Io { .. })
        ));
        assert!(repo.get_certificate("a.example").is_none());
    }

    #[tokio::test]
    async fn test_get_hides_certificate_within_a_day_of_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CertificateRepository::new(dir.path());
        let cert = self_signed("a.example", now_unix() + DAY_SECS / 2);
        repo.save(cert, "a.example").await.unwrap();

        assert!(repo.get_certificate("a.example").is_none());
    }

    #[tokio::test]
    async fn test_domains_expiring_within() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CertificateRepository::new(dir.path());
        repo.save(self_signed("soon.example", now_unix() + 3 * DAY_SECS), "soon.example")
            .await
            .unwrap();
        repo.save(self_signed("later.example", now_unix() + 60 * DAY_SECS), "later.example")
            .await
            .unwrap();

        assert_eq!(repo.domains_expiring_within(30 * DAY_SECS), vec!["soon.example".to_string()]);
    }
}
