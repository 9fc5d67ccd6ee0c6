//! Backend client handles for `bootkeeper`.
//!
//! This crate defines one trait per external secret service that a
//! bootstrap store can persist into. The traits are pure transport: they
//! move opaque bytes or flat field maps and know nothing about secret
//! documents, seeding, or which backend a cluster should use. Those
//! decisions live in `bootkeeper-core`.
//!
//! - [`ClusterSecrets`]: named, namespaced opaque resources in the target cluster
//! - [`SecretManager`]: a managed secret service addressed by discrete object names
//! - [`VaultKv`]: a path-based secret engine storing a field map per path
//!
//! Every trait has an in-memory implementation (for tests and the `fake`
//! kind) and, behind the default `http-clients` feature, an HTTP
//! implementation that takes an already-authenticated bearer token.

use std::collections::BTreeMap;

mod error;
#[cfg(feature = "http-clients")]
mod gsm;
#[cfg(feature = "http-clients")]
mod kube;
mod memory;
#[cfg(feature = "http-clients")]
mod vault;

pub use error::StorageError;
#[cfg(feature = "http-clients")]
pub use gsm::{GsmClient, Replication};
#[cfg(feature = "http-clients")]
pub use kube::KubeSecretsClient;
pub use memory::{MemoryClusterSecrets, MemorySecretManager, MemoryVault};
#[cfg(feature = "http-clients")]
pub use vault::VaultHttpClient;

/// An opaque, namespaced secret resource in the target cluster.
///
/// Field values are raw bytes; transport encodings (base64 on the wire)
/// are handled by the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretResource {
    /// Resource name, unique within its namespace.
    pub name: String,
    /// Namespace the resource lives in.
    pub namespace: String,
    /// Field name to raw value.
    pub data: BTreeMap<String, Vec<u8>>,
}

impl SecretResource {
    /// Create an empty resource with the given coordinates.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            data: BTreeMap::new(),
        }
    }

    /// Builder-style helper that sets one field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Access to opaque secret resources in the target cluster.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait ClusterSecrets: Send + Sync + 'static {
    /// Fetch a resource by name.
    ///
    /// Returns `Ok(None)` if the resource does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the cluster API fails.
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretResource>, StorageError>;

    /// Create a resource that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the cluster API rejects the create.
    async fn create(&self, resource: &SecretResource) -> Result<(), StorageError>;

    /// Replace an existing resource in place.
    ///
    /// No resource version is sent, so the update is unconditional and the
    /// last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the cluster API rejects the update.
    async fn update(&self, resource: &SecretResource) -> Result<(), StorageError>;

    /// Human-readable identity of the cluster endpoint, without credentials.
    fn describe(&self) -> String;
}

/// Access to a managed secret service holding individually named objects.
#[async_trait::async_trait]
pub trait SecretManager: Send + Sync + 'static {
    /// List object names that start with the given prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the service fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Read the latest version of an object.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the service fails.
    async fn access(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a new latest version of an object, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the service fails.
    async fn put(&self, name: &str, payload: &[u8]) -> Result<(), StorageError>;

    /// Delete an object and all its versions. Deleting an object that does
    /// not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the service fails.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Human-readable identity of the service (project, region).
    fn describe(&self) -> String;
}

/// Field map stored at one vault path.
pub type VaultFields = serde_json::Map<String, serde_json::Value>;

/// Access to a path-based secret engine.
#[async_trait::async_trait]
pub trait VaultKv: Send + Sync + 'static {
    /// Read the field map stored at a path.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the engine fails.
    async fn read(&self, path: &str) -> Result<Option<VaultFields>, StorageError>;

    /// Replace the field map stored at a path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the engine fails.
    async fn write(&self, path: &str, fields: &VaultFields) -> Result<(), StorageError>;

    /// Human-readable identity of the vault endpoint, without the token.
    fn describe(&self) -> String;
}
