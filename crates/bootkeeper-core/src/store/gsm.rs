//! Store backed by a managed cloud secret service.
//!
//! The document is split into field groups, one service object per group,
//! so each group can be granted and rotated on its own. A group is a child
//! of a top-level mapping (`secrets.adminUser`, `secrets.hmacToken`), or a
//! top-level scalar on its own. The object for a group is named from its
//! keys (`bootkeeper-secrets-adminUser`) and holds a YAML fragment rooted
//! at those keys, so merging all fragments rebuilds the document. Keys are
//! taken as they are; a key containing a dot stays one key.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bootkeeper_storage::{SecretManager, StorageError};
use tracing::debug;

use crate::document::{Node, SecretDocument};
use crate::error::{DocumentError, StoreError};

use super::{
    DocumentBackend, Kind, Lookup, SecretStore, UpsertCallback, replace_document, upsert_document,
};

/// Default prefix of every object name.
pub const DEFAULT_OBJECT_PREFIX: &str = "bootkeeper";

/// Persists each field group as an individually named service object.
pub struct ManagedSecretServiceStore {
    client: Arc<dyn SecretManager>,
    prefix: String,
}

/// One field group as it is written to the service.
struct Group {
    path: String,
    payload: String,
}

impl ManagedSecretServiceStore {
    /// A store using [`DEFAULT_OBJECT_PREFIX`].
    pub fn new(client: Arc<dyn SecretManager>) -> Self {
        Self::with_prefix(client, DEFAULT_OBJECT_PREFIX)
    }

    /// A store whose object names start with `prefix`.
    pub fn with_prefix(client: Arc<dyn SecretManager>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    /// Object name for the group at `keys` (outermost first).
    pub fn object_name(&self, keys: &[&str]) -> String {
        let mut name = self.prefix.clone();
        for key in keys {
            name.push('-');
            name.extend(key.chars().map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            }));
        }
        name
    }

    fn persistence(&self, operation: &'static str, source: StorageError) -> StoreError {
        StoreError::Persistence {
            store: self.to_string(),
            operation,
            source,
        }
    }

    fn document_error(&self, source: DocumentError) -> StoreError {
        StoreError::Document {
            store: self.to_string(),
            source,
        }
    }

    /// Every stored object under this prefix with its latest payload.
    async fn read_objects(&self) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let names = self
            .client
            .list(&format!("{}-", self.prefix))
            .await
            .map_err(|e| self.persistence("list", e))?;
        let mut objects = BTreeMap::new();
        for name in names {
            let payload = self
                .client
                .access(&name)
                .await
                .map_err(|e| self.persistence("read", e))?;
            // Deleted between list and access.
            if let Some(payload) = payload {
                objects.insert(name, payload);
            }
        }
        Ok(objects)
    }

    /// Split a document into named groups, rejecting name collisions.
    fn groups(&self, document: &SecretDocument) -> Result<BTreeMap<String, Group>, StoreError> {
        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for (key, node) in document.entries() {
            let members: Vec<(Vec<&str>, Node)> = match node {
                Node::Tree(children) => children
                    .iter()
                    .map(|(child, node)| {
                        let subtree = BTreeMap::from([(child.clone(), node.clone())]);
                        (vec![key.as_str(), child.as_str()], Node::Tree(subtree))
                    })
                    .collect(),
                Node::Leaf(_) => vec![(vec![key.as_str()], node.clone())],
            };
            for (keys, root) in members {
                let fragment: SecretDocument = [(key.clone(), root)].into_iter().collect();
                let payload = fragment.to_yaml().map_err(|e| self.document_error(e))?;
                let object = self.object_name(&keys);
                let path = keys.join(".");
                if let Some(existing) = groups.get(&object) {
                    return Err(StoreError::NameCollision {
                        store: self.to_string(),
                        object,
                        first: existing.path.clone(),
                        second: path,
                    });
                }
                groups.insert(object, Group { path, payload });
            }
        }
        Ok(groups)
    }
}

impl fmt::Debug for ManagedSecretServiceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSecretServiceStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ManagedSecretServiceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "objects '{}-*' in {}", self.prefix, self.client.describe())
    }
}

#[async_trait::async_trait]
impl DocumentBackend for ManagedSecretServiceStore {
    async fn load(&self) -> Result<Lookup, StoreError> {
        let objects = self.read_objects().await?;
        if objects.is_empty() {
            return Ok(Lookup::NotFound);
        }
        let mut document = SecretDocument::new();
        for (name, payload) in objects {
            let text = String::from_utf8(payload).map_err(|e| {
                self.document_error(DocumentError::Parse {
                    reason: format!("object '{name}' is not UTF-8: {e}"),
                })
            })?;
            let fragment = SecretDocument::from_yaml(&text).map_err(|e| self.document_error(e))?;
            document = SecretDocument::combine_overlay(&document, &fragment);
        }
        Ok(Lookup::Found(document))
    }

    async fn save(&self, document: &SecretDocument, existed: bool) -> Result<(), StoreError> {
        let groups = self.groups(document)?;
        let current = if existed {
            self.read_objects().await?
        } else {
            BTreeMap::new()
        };

        for (object, group) in &groups {
            if current.get(object).map(Vec::as_slice) == Some(group.payload.as_bytes()) {
                debug!(object = %object, "field group unchanged");
                continue;
            }
            self.client
                .put(object, group.payload.as_bytes())
                .await
                .map_err(|e| self.persistence("write", e))?;
        }

        for object in current.keys().filter(|name| !groups.contains_key(*name)) {
            self.client
                .delete(object)
                .await
                .map_err(|e| self.persistence("delete", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SecretStore for ManagedSecretServiceStore {
    async fn upsert_secrets(
        &self,
        callback: UpsertCallback<'_>,
        default_seed: &SecretDocument,
    ) -> Result<(), StoreError> {
        upsert_document(self, callback, default_seed).await
    }

    async fn replace_secrets(&self, document: &SecretDocument) -> Result<(), StoreError> {
        replace_document(self, document).await
    }

    fn kind(&self) -> Kind {
        Kind::Gsm
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bootkeeper_storage::MemorySecretManager;

    use super::*;

    const FULL: &str = "\
secrets:
  adminUser:
    password: p
    username: admin
  hmacToken: h
  pipelineUser:
    email: bot@example.com
    token: t
    username: bot
";

    fn store(service: &MemorySecretManager) -> ManagedSecretServiceStore {
        ManagedSecretServiceStore::new(Arc::new(service.clone()))
    }

    async fn write(store: &ManagedSecretServiceStore, text: &str) {
        store
            .upsert_secrets(&mut |_| Ok(text.to_owned()), &SecretDocument::new())
            .await
            .unwrap();
    }

    #[test]
    fn object_names_follow_the_path() {
        let store = store(&MemorySecretManager::new());
        assert_eq!(
            store.object_name(&["secrets", "adminUser"]),
            "bootkeeper-secrets-adminUser"
        );
        assert_eq!(store.object_name(&["odd key", "x"]), "bootkeeper-odd_key-x");
        assert_eq!(
            store.object_name(&["secrets", "git.token"]),
            "bootkeeper-secrets-git_token"
        );
    }

    #[tokio::test]
    async fn one_object_per_field_group() {
        let service = MemorySecretManager::new();
        write(&store(&service), FULL).await;
        let names = service.list("bootkeeper-").await.unwrap();
        assert_eq!(
            names,
            vec![
                "bootkeeper-secrets-adminUser",
                "bootkeeper-secrets-hmacToken",
                "bootkeeper-secrets-pipelineUser",
            ]
        );
        let payload = service
            .access("bootkeeper-secrets-hmacToken")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"secrets:\n  hmacToken: h\n");
    }

    #[tokio::test]
    async fn reads_back_the_whole_document() {
        let service = MemorySecretManager::new();
        let store = store(&service);
        write(&store, FULL).await;
        let mut seen = String::new();
        store
            .upsert_secrets(
                &mut |current| {
                    current.clone_into(&mut seen);
                    Ok(current.to_owned())
                },
                &SecretDocument::new(),
            )
            .await
            .unwrap();
        assert_eq!(seen, FULL);
    }

    #[tokio::test]
    async fn only_changed_groups_are_written() {
        let service = MemorySecretManager::new();
        let store = store(&service);
        write(&store, FULL).await;
        write(&store, &FULL.replace("hmacToken: h", "hmacToken: rotated")).await;
        assert_eq!(service.version_count("bootkeeper-secrets-hmacToken").await, 2);
        assert_eq!(service.version_count("bootkeeper-secrets-adminUser").await, 1);
        assert_eq!(service.version_count("bootkeeper-secrets-pipelineUser").await, 1);
    }

    #[tokio::test]
    async fn removed_groups_are_deleted() {
        let service = MemorySecretManager::new();
        let store = store(&service);
        write(&store, FULL).await;
        write(&store, "secrets:\n  hmacToken: h\n").await;
        assert_eq!(
            service.list("bootkeeper-").await.unwrap(),
            vec!["bootkeeper-secrets-hmacToken"]
        );
    }

    #[tokio::test]
    async fn keys_with_dots_round_trip() {
        let service = MemorySecretManager::new();
        let store = store(&service);
        let text = "secrets:\n  adminUser:\n    user.name: admin\n  git.token: abc\n";
        write(&store, text).await;
        assert_eq!(
            service.list("bootkeeper-").await.unwrap(),
            vec!["bootkeeper-secrets-adminUser", "bootkeeper-secrets-git_token"]
        );

        let mut seen = String::new();
        store
            .upsert_secrets(
                &mut |current| {
                    current.clone_into(&mut seen);
                    Ok(current.to_owned())
                },
                &SecretDocument::new(),
            )
            .await
            .unwrap();
        assert_eq!(seen, text);
    }

    #[tokio::test]
    async fn top_level_scalar_is_its_own_group() {
        let service = MemorySecretManager::new();
        write(&store(&service), "clusterName: dev\n").await;
        let payload = service
            .access("bootkeeper-clusterName")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"clusterName: dev\n");
    }

    #[tokio::test]
    async fn colliding_paths_are_rejected() {
        let service = MemorySecretManager::new();
        let result = store(&service)
            .upsert_secrets(
                &mut |_| Ok("a:\n  b-c: x\na-b:\n  c: y\n".to_owned()),
                &SecretDocument::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(StoreError::NameCollision { ref object, .. }) if object == "bootkeeper-a-b-c"
        ));
        assert_eq!(service.write_attempts(), 0);
    }
}
