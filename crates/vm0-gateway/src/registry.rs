//! Stat-keyed cached reads of the proxy registry.
//!
//! The registry file is written by the runner orchestration whenever a VM is
//! registered or torn down; this side only ever reads it. There is no file
//! locking: consistency comes from caching the parsed snapshot under the
//! file's `(modified-time, size)` key and re-reading only when that key
//! changes. A load that fails for any reason keeps serving the previous
//! snapshot, so a write-in-progress can never deny service to active flows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use vm0_policy::Rule;

/// One VM's registration, keyed by its IP address in the registry file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmRegistration {
    /// Opaque run identifier, forwarded to the rewriting endpoint.
    pub run_id: Option<String>,

    /// Bearer credential for the rewriting endpoint.
    pub sandbox_token: Option<String>,

    /// True: decrypt and rewrite through the trusted upstream.
    /// False: decide from the SNI alone, without decryption.
    pub mitm_enabled: bool,

    /// Ordered firewall rules for this run.
    pub firewall_rules: Vec<Rule>,

    /// Absolute path of the run's JSONL network log.
    pub network_log_path: Option<PathBuf>,
}

/// Immutable view of the registry at one point in time.
pub type RegistrySnapshot = Arc<HashMap<String, VmRegistration>>;

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    vms: HashMap<String, VmRegistration>,
}

#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid registry JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct Slot {
    key: Option<(SystemTime, u64)>,
    snapshot: RegistrySnapshot,
}

/// Cached reader of the registry file.
///
/// Snapshots are swapped atomically behind the lock, never mutated in place;
/// concurrent readers may hold any prior snapshot.
#[derive(Debug)]
pub struct RegistryCache {
    path: PathBuf,
    slot: RwLock<Slot>,
}

impl RegistryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slot: RwLock::new(Slot::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current registry snapshot.
    ///
    /// Returns the cached snapshot while the file's `(modified, size)` key
    /// is unchanged, and the previous snapshot (possibly empty) when the
    /// file cannot be statted, read, or parsed.
    pub async fn load(&self) -> RegistrySnapshot {
        match self.refresh().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to load proxy registry"
                );
                self.slot.read().await.snapshot.clone()
            }
        }
    }

    /// Registration for one client IP, if present.
    pub async fn lookup(&self, client_ip: &str) -> Option<VmRegistration> {
        self.load().await.get(client_ip).cloned()
    }

    async fn refresh(&self) -> Result<RegistrySnapshot, LoadError> {
        let meta = fs::metadata(&self.path).await?;
        let key = (meta.modified()?, meta.len());

        {
            let slot = self.slot.read().await;
            if slot.key == Some(key) {
                return Ok(slot.snapshot.clone());
            }
        }

        let raw = fs::read(&self.path).await?;
        let parsed: RegistryFile = serde_json::from_slice(&raw)?;
        let snapshot: RegistrySnapshot = Arc::new(parsed.vms);

        let mut slot = self.slot.write().await;
        slot.key = Some(key);
        slot.snapshot = Arc::clone(&snapshot);
        debug!(vms = snapshot.len(), "reloaded proxy registry");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_json(ip: &str, mitm: bool) -> String {
        format!(
            r#"{{"vms": {{"{ip}": {{
                "runId": "run-1",
                "sandboxToken": "tok",
                "mitmEnabled": {mitm},
                "firewallRules": [{{"domain": "*.example.com", "action": "ALLOW"}}],
                "networkLogPath": "/tmp/run-1.jsonl"
            }}}}}}"#
        )
    }

    #[tokio::test]
    async fn parses_camel_case_registrations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, registry_json("10.0.0.5", true)).unwrap();

        let cache = RegistryCache::new(&path);
        let vm = cache.lookup("10.0.0.5").await.unwrap();
        assert_eq!(vm.run_id.as_deref(), Some("run-1"));
        assert_eq!(vm.sandbox_token.as_deref(), Some("tok"));
        assert!(vm.mitm_enabled);
        assert_eq!(vm.firewall_rules.len(), 1);
        assert_eq!(
            vm.network_log_path.as_deref(),
            Some(Path::new("/tmp/run-1.jsonl"))
        );
    }

    #[tokio::test]
    async fn unchanged_file_reuses_the_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, registry_json("10.0.0.5", false)).unwrap();

        let cache = RegistryCache::new(&path);
        let a = cache.load().await;
        let b = cache.load().await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn changed_file_produces_a_new_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, registry_json("10.0.0.5", false)).unwrap();

        let cache = RegistryCache::new(&path);
        let before = cache.load().await;

        // Different byte length guarantees a new (modified, size) key even
        // on filesystems with coarse mtime resolution.
        std::fs::write(&path, registry_json("10.0.0.77", false)).unwrap();
        let after = cache.load().await;

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.contains_key("10.0.0.77"));
        assert!(!after.contains_key("10.0.0.5"));
    }

    #[tokio::test]
    async fn corrupt_file_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, registry_json("10.0.0.5", false)).unwrap();

        let cache = RegistryCache::new(&path);
        let before = cache.load().await;
        assert!(before.contains_key("10.0.0.5"));

        std::fs::write(&path, "{ half a registry").unwrap();
        let after = cache.load().await;
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn missing_file_serves_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let cache = RegistryCache::new(dir.path().join("nope.json"));
        assert!(cache.load().await.is_empty());
        assert!(cache.lookup("10.0.0.5").await.is_none());
    }
}
