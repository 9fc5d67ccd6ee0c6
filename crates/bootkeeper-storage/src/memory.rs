//! In-memory backend clients for testing.
//!
//! Each client stores its data in a `BTreeMap` behind a `RwLock`. Nothing is
//! persistent; all data is lost when the process exits. Clones share state,
//! so a test can hand one clone to a store and inspect the other.
//!
//! Every client counts write attempts and can be switched into a failing
//! mode, which lets tests exercise fault policies without a real service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::{ClusterSecrets, SecretManager, SecretResource, StorageError, VaultFields, VaultKv};

/// Write-attempt counter and failure switch shared by clones of a client.
#[derive(Debug, Default)]
struct Faults {
    fail_writes: AtomicBool,
    write_attempts: AtomicUsize,
}

impl Faults {
    /// Record a write attempt, failing it if the switch is on.
    fn attempt_write(&self, target: &str) -> Result<(), StorageError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                target: target.to_owned(),
                reason: "injected write failure".to_owned(),
            });
        }
        Ok(())
    }
}

macro_rules! fault_controls {
    ($ty:ty) => {
        impl $ty {
            /// Make every subsequent write fail (or succeed again).
            pub fn fail_writes(&self, fail: bool) {
                self.faults.fail_writes.store(fail, Ordering::SeqCst);
            }

            /// Number of write attempts made so far, failed ones included.
            #[must_use]
            pub fn write_attempts(&self) -> usize {
                self.faults.write_attempts.load(Ordering::SeqCst)
            }
        }
    };
}

/// In-memory cluster secrets keyed by `(namespace, name)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryClusterSecrets {
    data: Arc<RwLock<BTreeMap<(String, String), SecretResource>>>,
    faults: Arc<Faults>,
}

impl MemoryClusterSecrets {
    /// Create an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cluster pre-populated with the given resources.
    #[must_use]
    pub fn with_resources(resources: impl IntoIterator<Item = SecretResource>) -> Self {
        let data = resources
            .into_iter()
            .map(|r| ((r.namespace.clone(), r.name.clone()), r))
            .collect();
        Self {
            data: Arc::new(RwLock::new(data)),
            faults: Arc::default(),
        }
    }
}

fault_controls!(MemoryClusterSecrets);

#[async_trait::async_trait]
impl ClusterSecrets for MemoryClusterSecrets {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretResource>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(&(namespace.to_owned(), name.to_owned())).cloned())
    }

    async fn create(&self, resource: &SecretResource) -> Result<(), StorageError> {
        let target = format!("{}/{}", resource.namespace, resource.name);
        self.faults.attempt_write(&target)?;
        let mut data = self.data.write().await;
        let key = (resource.namespace.clone(), resource.name.clone());
        if data.contains_key(&key) {
            return Err(StorageError::Write {
                target,
                reason: "already exists".to_owned(),
            });
        }
        data.insert(key, resource.clone());
        Ok(())
    }

    async fn update(&self, resource: &SecretResource) -> Result<(), StorageError> {
        let target = format!("{}/{}", resource.namespace, resource.name);
        self.faults.attempt_write(&target)?;
        let mut data = self.data.write().await;
        let key = (resource.namespace.clone(), resource.name.clone());
        match data.get_mut(&key) {
            Some(existing) => {
                existing.clone_from(resource);
                Ok(())
            }
            None => Err(StorageError::Write {
                target,
                reason: "not found".to_owned(),
            }),
        }
    }

    fn describe(&self) -> String {
        "in-memory cluster".to_owned()
    }
}

/// In-memory managed secret service keeping every version of every object.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretManager {
    data: Arc<RwLock<BTreeMap<String, Vec<Vec<u8>>>>>,
    faults: Arc<Faults>,
}

impl MemorySecretManager {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of versions stored for an object (0 if absent).
    pub async fn version_count(&self, name: &str) -> usize {
        self.data.read().await.get(name).map_or(0, Vec::len)
    }
}

fault_controls!(MemorySecretManager);

#[async_trait::async_trait]
impl SecretManager for MemorySecretManager {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let names = data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(names)
    }

    async fn access(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(name).and_then(|versions| versions.last().cloned()))
    }

    async fn put(&self, name: &str, payload: &[u8]) -> Result<(), StorageError> {
        self.faults.attempt_write(name)?;
        let mut data = self.data.write().await;
        data.entry(name.to_owned())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.faults.attempt_write(name)?;
        let mut data = self.data.write().await;
        data.remove(name);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory secret manager".to_owned()
    }
}

/// In-memory vault keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryVault {
    data: Arc<RwLock<BTreeMap<String, VaultFields>>>,
    faults: Arc<Faults>,
}

impl MemoryVault {
    /// Create an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fault_controls!(MemoryVault);

#[async_trait::async_trait]
impl VaultKv for MemoryVault {
    async fn read(&self, path: &str) -> Result<Option<VaultFields>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(path).cloned())
    }

    async fn write(&self, path: &str, fields: &VaultFields) -> Result<(), StorageError> {
        self.faults.attempt_write(path)?;
        let mut data = self.data.write().await;
        data.insert(path.to_owned(), fields.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory vault".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cluster_get_nonexistent_returns_none() {
        let cluster = MemoryClusterSecrets::new();
        assert_eq!(cluster.get("jx", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cluster_create_then_get() {
        let cluster = MemoryClusterSecrets::new();
        let resource = SecretResource::new("jx", "boot").with_field("a", "1");
        cluster.create(&resource).await.unwrap();
        assert_eq!(cluster.get("jx", "boot").await.unwrap(), Some(resource));
    }

    #[tokio::test]
    async fn cluster_create_twice_fails() {
        let cluster = MemoryClusterSecrets::new();
        let resource = SecretResource::new("jx", "boot");
        cluster.create(&resource).await.unwrap();
        let result = cluster.create(&resource).await;
        assert!(matches!(result, Err(StorageError::Write { .. })));
    }

    #[tokio::test]
    async fn cluster_update_missing_fails() {
        let cluster = MemoryClusterSecrets::new();
        let result = cluster.update(&SecretResource::new("jx", "boot")).await;
        assert!(matches!(result, Err(StorageError::Write { .. })));
    }

    #[tokio::test]
    async fn cluster_namespaces_are_isolated() {
        let cluster =
            MemoryClusterSecrets::with_resources([SecretResource::new("jx", "boot")]);
        assert!(cluster.get("jx", "boot").await.unwrap().is_some());
        assert!(cluster.get("other", "boot").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failure_counts_attempts() {
        let cluster = MemoryClusterSecrets::new();
        cluster.fail_writes(true);
        let result = cluster.create(&SecretResource::new("jx", "boot")).await;
        assert!(result.is_err());
        assert_eq!(cluster.write_attempts(), 1);
        assert!(cluster.get("jx", "boot").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn secret_manager_keeps_versions() {
        let sm = MemorySecretManager::new();
        sm.put("a", b"v1").await.unwrap();
        sm.put("a", b"v2").await.unwrap();
        assert_eq!(sm.access("a").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(sm.version_count("a").await, 2);
    }

    #[tokio::test]
    async fn secret_manager_list_with_prefix() {
        let sm = MemorySecretManager::new();
        sm.put("boot-a", b"1").await.unwrap();
        sm.put("boot-b", b"2").await.unwrap();
        sm.put("other", b"3").await.unwrap();
        assert_eq!(sm.list("boot-").await.unwrap(), vec!["boot-a", "boot-b"]);
    }

    #[tokio::test]
    async fn secret_manager_delete_nonexistent_is_noop() {
        let sm = MemorySecretManager::new();
        sm.delete("nope").await.unwrap();
        assert_eq!(sm.access("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn vault_write_and_read() {
        let vault = MemoryVault::new();
        let mut fields = VaultFields::new();
        fields.insert("yaml".to_owned(), "a: b\n".into());
        vault.write("jx/boot", &fields).await.unwrap();
        assert_eq!(vault.read("jx/boot").await.unwrap(), Some(fields));
        assert_eq!(vault.read("jx/other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let vault = MemoryVault::new();
        let clone = vault.clone();
        vault.write("p", &VaultFields::new()).await.unwrap();
        assert!(clone.read("p").await.unwrap().is_some());
        assert_eq!(clone.write_attempts(), 1);
    }
}
