//! Store backed by one opaque secret resource in the target cluster.

use std::fmt;
use std::sync::Arc;

use bootkeeper_storage::{ClusterSecrets, SecretResource, StorageError};

use crate::document::SecretDocument;
use crate::error::{DocumentError, StoreError};

use super::{
    DocumentBackend, Kind, Lookup, SecretStore, UpsertCallback, replace_document, upsert_document,
};

/// Name of the cluster resource holding the document.
pub const LOCAL_SECRET_NAME: &str = "bootkeeper-secrets";

/// Field of [`LOCAL_SECRET_NAME`] holding the serialized document.
pub const LOCAL_SECRET_FIELD: &str = "secrets.yaml";

/// Persists the whole document as one field of one named resource.
///
/// Updates are unconditional: two concurrent writers can lose each
/// other's changes.
pub struct ClusterResourceStore {
    client: Arc<dyn ClusterSecrets>,
    namespace: String,
    name: String,
}

impl ClusterResourceStore {
    /// A store for [`LOCAL_SECRET_NAME`] in `namespace`.
    pub fn new(client: Arc<dyn ClusterSecrets>, namespace: impl Into<String>) -> Self {
        Self::with_name(client, namespace, LOCAL_SECRET_NAME)
    }

    /// A store for an arbitrary resource name.
    pub fn with_name(
        client: Arc<dyn ClusterSecrets>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn persistence(&self, operation: &'static str, source: StorageError) -> StoreError {
        StoreError::Persistence {
            store: self.to_string(),
            operation,
            source,
        }
    }

    async fn fetch(&self) -> Result<Option<SecretResource>, StoreError> {
        self.client
            .get(&self.namespace, &self.name)
            .await
            .map_err(|e| self.persistence("read", e))
    }
}

impl fmt::Debug for ClusterResourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterResourceStore")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ClusterResourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster secret {}/{} on {}",
            self.namespace,
            self.name,
            self.client.describe()
        )
    }
}

/// Convert a cluster secret into a document.
///
/// The [`LOCAL_SECRET_FIELD`] field is parsed when present. Otherwise every
/// field key is treated as a dotted path under `secrets`, which is how
/// secrets created by hand tend to look.
///
/// # Errors
///
/// - [`DocumentError::Parse`] if the field is not valid UTF-8 or YAML.
/// - [`DocumentError::NotATree`] if two flat keys conflict.
pub fn document_from_resource(resource: &SecretResource) -> Result<SecretDocument, DocumentError> {
    if let Some(bytes) = resource.data.get(LOCAL_SECRET_FIELD).filter(|b| !b.is_empty()) {
        let text = std::str::from_utf8(bytes).map_err(|e| DocumentError::Parse {
            reason: format!("field '{LOCAL_SECRET_FIELD}' is not UTF-8: {e}"),
        })?;
        return SecretDocument::from_yaml(text);
    }

    let mut document = SecretDocument::new();
    for (key, value) in &resource.data {
        let value = String::from_utf8_lossy(value).into_owned();
        document.set(&format!("secrets.{key}"), value)?;
    }
    document.prune_empty();
    Ok(document)
}

#[async_trait::async_trait]
impl DocumentBackend for ClusterResourceStore {
    async fn load(&self) -> Result<Lookup, StoreError> {
        let Some(resource) = self.fetch().await? else {
            return Ok(Lookup::NotFound);
        };
        let document = document_from_resource(&resource).map_err(|source| StoreError::Document {
            store: self.to_string(),
            source,
        })?;
        Ok(Lookup::Found(document))
    }

    async fn save(&self, document: &SecretDocument, existed: bool) -> Result<(), StoreError> {
        let yaml = document.to_yaml().map_err(|source| StoreError::Document {
            store: self.to_string(),
            source,
        })?;

        // Re-read so fields other than the document survive the update.
        let current = if existed { self.fetch().await? } else { None };
        match current {
            Some(mut resource) => {
                resource.data.insert(LOCAL_SECRET_FIELD.to_owned(), yaml.into_bytes());
                self.client
                    .update(&resource)
                    .await
                    .map_err(|e| self.persistence("update", e))
            }
            None => {
                let resource = SecretResource::new(&self.namespace, &self.name)
                    .with_field(LOCAL_SECRET_FIELD, yaml);
                self.client
                    .create(&resource)
                    .await
                    .map_err(|e| self.persistence("create", e))
            }
        }
    }
}

#[async_trait::async_trait]
impl SecretStore for ClusterResourceStore {
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
        Kind::Local
    }
}
