//! Store backed by one path in a vault secret engine.

use std::fmt;
use std::sync::Arc;

use bootkeeper_storage::{StorageError, VaultFields, VaultKv};
use serde_json::Value;

use crate::document::SecretDocument;
use crate::error::{DocumentError, StoreError};

use super::{
    DocumentBackend, Kind, Lookup, SecretStore, UpsertCallback, replace_document, upsert_document,
};

/// Default vault path for the document.
pub const DEFAULT_VAULT_PATH: &str = "jx";

/// Field at the vault path holding the serialized document.
pub const VAULT_SECRET_FIELD: &str = "yaml";

/// Persists the whole document as the [`VAULT_SECRET_FIELD`] field of one
/// vault path. Other fields at that path are kept on write.
pub struct VaultPathStore {
    client: Arc<dyn VaultKv>,
    path: String,
}

impl VaultPathStore {
    /// A store for [`DEFAULT_VAULT_PATH`].
    pub fn new(client: Arc<dyn VaultKv>) -> Self {
        Self::with_path(client, DEFAULT_VAULT_PATH)
    }

    /// A store for an arbitrary path.
    pub fn with_path(client: Arc<dyn VaultKv>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
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

    async fn read_fields(&self) -> Result<Option<VaultFields>, StoreError> {
        self.client
            .read(&self.path)
            .await
            .map_err(|e| self.persistence("read", e))
    }
}

impl fmt::Debug for VaultPathStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultPathStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for VaultPathStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path '{}' in {}", self.path, self.client.describe())
    }
}

#[async_trait::async_trait]
impl DocumentBackend for VaultPathStore {
    async fn load(&self) -> Result<Lookup, StoreError> {
        let Some(fields) = self.read_fields().await? else {
            return Ok(Lookup::NotFound);
        };
        let text = match fields.get(VAULT_SECRET_FIELD) {
            None | Some(Value::Null) => return Ok(Lookup::NotFound),
            Some(Value::String(text)) => text,
            Some(_) => {
                return Err(self.document_error(DocumentError::Parse {
                    reason: format!("field '{VAULT_SECRET_FIELD}' is not a string"),
                }));
            }
        };
        let document = SecretDocument::from_yaml(text).map_err(|e| self.document_error(e))?;
        Ok(Lookup::Found(document))
    }

    async fn save(&self, document: &SecretDocument, existed: bool) -> Result<(), StoreError> {
        let yaml = document.to_yaml().map_err(|e| self.document_error(e))?;
        let mut fields = if existed {
            self.read_fields().await?.unwrap_or_default()
        } else {
            VaultFields::new()
        };
        fields.insert(VAULT_SECRET_FIELD.to_owned(), Value::String(yaml));
        self.client
            .write(&self.path, &fields)
            .await
            .map_err(|e| self.persistence("write", e))
    }
}

#[async_trait::async_trait]
impl SecretStore for VaultPathStore {
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
        Kind::Vault
    }
}
