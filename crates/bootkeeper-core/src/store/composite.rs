//! Write-through composition of an authoritative store and a mirror.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::document::SecretDocument;
use crate::error::StoreError;

use super::{Kind, SecretStore, UpsertCallback};

/// Whether a failed write to one side of a [`CompositeStore`] fails the
/// whole upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRequirement {
    /// Failure aborts the upsert.
    Required,
    /// Failure is logged and recorded; the upsert still succeeds.
    Advisory,
}

/// Per-side write requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutPolicy {
    pub primary: WriteRequirement,
    pub mirror: WriteRequirement,
}

impl Default for FanOutPolicy {
    /// Primary must succeed, the mirror is best effort.
    fn default() -> Self {
        Self {
            primary: WriteRequirement::Required,
            mirror: WriteRequirement::Advisory,
        }
    }
}

/// An advisory write failure that did not fail the upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    /// Identity of the store that failed.
    pub store: String,
    /// Rendered error.
    pub error: String,
}

/// Reads from `primary` only; writes to `primary` first and then to
/// `mirror` according to a [`FanOutPolicy`].
///
/// The mirror is never read. When the primary's document changes, the
/// mirror is overwritten with it, so the callback runs once per upsert and
/// a mirror holding unreadable data is repaired by the next change.
pub struct CompositeStore {
    primary: Box<dyn SecretStore>,
    mirror: Box<dyn SecretStore>,
    policy: FanOutPolicy,
    failures: Mutex<Vec<MirrorFailure>>,
}

impl CompositeStore {
    /// Compose with the default policy.
    pub fn new(primary: Box<dyn SecretStore>, mirror: Box<dyn SecretStore>) -> Self {
        Self::with_policy(primary, mirror, FanOutPolicy::default())
    }

    pub fn with_policy(
        primary: Box<dyn SecretStore>,
        mirror: Box<dyn SecretStore>,
        policy: FanOutPolicy,
    ) -> Self {
        Self {
            primary,
            mirror,
            policy,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Advisory failures recorded so far, oldest first.
    pub fn mirror_failures(&self) -> Vec<MirrorFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn settle(
        &self,
        store: &dyn SecretStore,
        requirement: WriteRequirement,
        result: Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        match (result, requirement) {
            (Ok(()), _) => Ok(()),
            (Err(e), WriteRequirement::Required) => Err(e),
            (Err(e), WriteRequirement::Advisory) => {
                let store = store.to_string();
                warn!(store = %store, error = %e, "advisory secrets write failed");
                self.failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(MirrorFailure {
                        store,
                        error: e.to_string(),
                    });
                Ok(())
            }
        }
    }
}

impl fmt::Debug for CompositeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeStore")
            .field("primary", &self.primary.to_string())
            .field("mirror", &self.mirror.to_string())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CompositeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mirrored to {}", self.primary, self.mirror)
    }
}

#[async_trait::async_trait]
impl SecretStore for CompositeStore {
    async fn upsert_secrets(
        &self,
        callback: UpsertCallback<'_>,
        default_seed: &SecretDocument,
    ) -> Result<(), StoreError> {
        let mut outcome: Option<(String, String)> = None;
        let primary_result = self
            .primary
            .upsert_secrets(
                &mut |current| {
                    let desired = callback(current)?;
                    outcome = Some((current.to_owned(), desired.clone()));
                    Ok(desired)
                },
                default_seed,
            )
            .await;
        // A callback failure is never a write failure.
        if let Err(e @ StoreError::Callback { .. }) = primary_result {
            return Err(e);
        }
        self.settle(self.primary.as_ref(), self.policy.primary, primary_result)?;

        let Some((loaded, desired)) = outcome else {
            debug!(store = %self.primary, "primary was not loaded, nothing to mirror");
            return Ok(());
        };
        let document = SecretDocument::from_yaml(&desired).map_err(|source| StoreError::Document {
            store: self.to_string(),
            source,
        })?;
        let canonical = document.to_yaml().map_err(|source| StoreError::Document {
            store: self.to_string(),
            source,
        })?;
        if canonical == loaded {
            debug!(store = %self.mirror, "secrets unchanged, mirror not written");
            return Ok(());
        }

        let mirror_result = self.mirror.replace_secrets(&document).await;
        self.settle(self.mirror.as_ref(), self.policy.mirror, mirror_result)
    }

    async fn replace_secrets(&self, document: &SecretDocument) -> Result<(), StoreError> {
        let primary_result = self.primary.replace_secrets(document).await;
        self.settle(self.primary.as_ref(), self.policy.primary, primary_result)?;
        let mirror_result = self.mirror.replace_secrets(document).await;
        self.settle(self.mirror.as_ref(), self.policy.mirror, mirror_result)
    }

    fn kind(&self) -> Kind {
        self.primary.kind()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use bootkeeper_storage::{
        ClusterSecrets, MemoryClusterSecrets, MemoryVault, SecretResource, VaultKv,
    };

    use super::*;
    use crate::store::{ClusterResourceStore, LOCAL_SECRET_FIELD, LOCAL_SECRET_NAME, VaultPathStore};

    struct Fixture {
        vault: MemoryVault,
        cluster: MemoryClusterSecrets,
        store: CompositeStore,
    }

    fn fixture(policy: FanOutPolicy) -> Fixture {
        let vault = MemoryVault::new();
        let cluster = MemoryClusterSecrets::new();
        let store = CompositeStore::with_policy(
            Box::new(VaultPathStore::new(Arc::new(vault.clone()))),
            Box::new(ClusterResourceStore::new(Arc::new(cluster.clone()), "jx")),
            policy,
        );
        Fixture {
            vault,
            cluster,
            store,
        }
    }

    async fn upsert(store: &CompositeStore, text: &str) -> Result<(), StoreError> {
        store
            .upsert_secrets(&mut |_| Ok(text.to_owned()), &SecretDocument::new())
            .await
    }

    #[tokio::test]
    async fn writes_both_sides() {
        let f = fixture(FanOutPolicy::default());
        upsert(&f.store, "a: b\n").await.unwrap();
        assert!(f.vault.read("jx").await.unwrap().is_some());
        let mirrored = f.cluster.get("jx", LOCAL_SECRET_NAME).await.unwrap().unwrap();
        assert_eq!(mirrored.data[LOCAL_SECRET_FIELD], b"a: b\n");
        assert!(f.store.mirror_failures().is_empty());
    }

    #[tokio::test]
    async fn primary_failure_never_touches_mirror() {
        let f = fixture(FanOutPolicy::default());
        f.vault.fail_writes(true);
        let result = upsert(&f.store, "a: b\n").await;
        assert!(matches!(result, Err(StoreError::Persistence { .. })));
        assert_eq!(f.cluster.write_attempts(), 0);
    }

    #[tokio::test]
    async fn mirror_failure_is_advisory() {
        let f = fixture(FanOutPolicy::default());
        f.cluster.fail_writes(true);
        upsert(&f.store, "a: b\n").await.unwrap();
        assert!(f.vault.read("jx").await.unwrap().is_some());
        let failures = f.store.mirror_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].store.starts_with("cluster secret jx/"));
        assert!(failures[0].error.contains("injected write failure"));
    }

    #[tokio::test]
    async fn required_mirror_failure_fails_the_upsert() {
        let f = fixture(FanOutPolicy {
            primary: WriteRequirement::Required,
            mirror: WriteRequirement::Required,
        });
        f.cluster.fail_writes(true);
        assert!(upsert(&f.store, "a: b\n").await.is_err());
    }

    #[tokio::test]
    async fn callback_runs_once_and_mirror_gets_its_result() {
        let f = fixture(FanOutPolicy::default());
        let mut calls = 0;
        f.store
            .upsert_secrets(
                &mut |_| {
                    calls += 1;
                    Ok("x: y\n".to_owned())
                },
                &SecretDocument::new(),
            )
            .await
            .unwrap();
        assert_eq!(calls, 1);
        let mirrored = f.cluster.get("jx", LOCAL_SECRET_NAME).await.unwrap().unwrap();
        assert_eq!(mirrored.data[LOCAL_SECRET_FIELD], b"x: y\n");
    }

    #[tokio::test]
    async fn callback_error_writes_nothing() {
        let f = fixture(FanOutPolicy::default());
        let result = f
            .store
            .upsert_secrets(
                &mut |_| Err(StoreError::callback("no")),
                &SecretDocument::new(),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Callback { .. })));
        assert_eq!(f.vault.write_attempts(), 0);
        assert_eq!(f.cluster.write_attempts(), 0);
    }

    #[tokio::test]
    async fn unreadable_mirror_is_overwritten() {
        let vault = MemoryVault::new();
        let cluster = MemoryClusterSecrets::with_resources([SecretResource::new(
            "jx",
            LOCAL_SECRET_NAME,
        )
        .with_field(LOCAL_SECRET_FIELD, "secrets: [unclosed")
        .with_field("owner", "ops")]);
        let store = CompositeStore::new(
            Box::new(VaultPathStore::new(Arc::new(vault.clone()))),
            Box::new(ClusterResourceStore::new(Arc::new(cluster.clone()), "jx")),
        );

        upsert(&store, "a: b\n").await.unwrap();
        assert!(store.mirror_failures().is_empty());
        let mirrored = cluster.get("jx", LOCAL_SECRET_NAME).await.unwrap().unwrap();
        assert_eq!(mirrored.data[LOCAL_SECRET_FIELD], b"a: b\n");
        assert_eq!(mirrored.data["owner"], b"ops");
    }

    #[tokio::test]
    async fn read_only_upsert_on_fresh_stores_writes_nothing() {
        let f = fixture(FanOutPolicy::default());
        f.store
            .upsert_secrets(
                &mut |current| Ok(current.to_owned()),
                &SecretDocument::default_seed(),
            )
            .await
            .unwrap();
        assert_eq!(f.vault.write_attempts(), 0);
        assert_eq!(f.cluster.write_attempts(), 0);
        assert!(f.cluster.get("jx", LOCAL_SECRET_NAME).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_overwrites_both_sides() {
        let f = fixture(FanOutPolicy::default());
        let document = SecretDocument::from_yaml("a: b\n").unwrap();
        f.store.replace_secrets(&document).await.unwrap();
        assert!(f.vault.read("jx").await.unwrap().is_some());
        let mirrored = f.cluster.get("jx", LOCAL_SECRET_NAME).await.unwrap().unwrap();
        assert_eq!(mirrored.data[LOCAL_SECRET_FIELD], b"a: b\n");
    }

    #[test]
    fn kind_and_identity_come_from_both_sides() {
        let f = fixture(FanOutPolicy::default());
        assert_eq!(f.store.kind(), Kind::Vault);
        let display = f.store.to_string();
        assert!(display.contains(" mirrored to cluster secret jx/"), "{display}");
    }
}
