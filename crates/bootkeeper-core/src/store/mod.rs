//! The uniform secret store contract and its backends.
//!
//! Every backend satisfies [`SecretStore`]: a single read-modify-write
//! cycle, [`SecretStore::upsert_secrets`], that loads the current document
//! (or the caller's default seed when the target has never been written),
//! hands its canonical YAML to a callback, and persists the callback's
//! result only when it differs from what was loaded. An untouched seed is
//! never written.
//!
//! Backends that hold one whole document implement the internal
//! [`DocumentBackend`] trait and share [`upsert_document`]; the composite
//! store orchestrates two other stores instead.

mod composite;
mod gsm;
mod local;
mod memory;
mod vault;

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::document::SecretDocument;
use crate::error::{DocumentError, ResolveError, StoreError};

pub use composite::{CompositeStore, FanOutPolicy, MirrorFailure, WriteRequirement};
pub use gsm::{DEFAULT_OBJECT_PREFIX, ManagedSecretServiceStore};
pub use local::{
    ClusterResourceStore, LOCAL_SECRET_FIELD, LOCAL_SECRET_NAME, document_from_resource,
};
pub use memory::{DEFAULT_MEMORY_PATH, InMemoryStore};
pub use vault::{DEFAULT_VAULT_PATH, VAULT_SECRET_FIELD, VaultPathStore};

/// The closed set of store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// One opaque resource in the target cluster.
    Local,
    /// One path in a path-based secret engine.
    Vault,
    /// The managed cloud secret service (mirrored into the cluster).
    Gsm,
    /// Process-wide in-memory store for tests.
    Fake,
}

impl Kind {
    /// Every kind, in the order they are documented.
    pub const ALL: [Self; 4] = [Self::Local, Self::Vault, Self::Gsm, Self::Fake];

    /// The identifier used on the command line and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Vault => "vault",
            Self::Gsm => "gsm",
            Self::Fake => "fake",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ResolveError;

    /// Case-sensitive; anything else is a configuration error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ResolveError::UnknownKind { kind: s.to_owned() })
    }
}

/// Transformation applied to the current document's canonical YAML.
///
/// Returns the desired document as YAML. The callback must not touch the
/// backend; only the store commits.
pub type UpsertCallback<'a> = &'a mut (dyn FnMut(&str) -> Result<String, StoreError> + Send);

/// A persistence target for the secret document.
#[async_trait::async_trait]
pub trait SecretStore: fmt::Display + Send + Sync {
    /// Load the document (or `default_seed` if the target has never been
    /// written), pass its canonical YAML to `callback`, and persist the
    /// result if it differs.
    ///
    /// A target that does not exist yet is not an error. Nothing is written
    /// when the callback's result equals the loaded document (or the seed),
    /// so a read-only callback never creates the target.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Persistence`] for any backend read/write failure.
    /// - [`StoreError::Document`] if stored or returned text is not a valid document.
    /// - [`StoreError::Callback`] if the callback fails; nothing is written.
    async fn upsert_secrets(
        &self,
        callback: UpsertCallback<'_>,
        default_seed: &SecretDocument,
    ) -> Result<(), StoreError>;

    /// Overwrite the stored document with `document` without reading the
    /// document currently stored, so a corrupt target can still be
    /// repaired. Data the backend keeps beside the document is preserved.
    ///
    /// # Errors
    ///
    /// [`StoreError::Persistence`] for any backend read/write failure.
    async fn replace_secrets(&self, document: &SecretDocument) -> Result<(), StoreError>;

    /// Which implementation this is.
    fn kind(&self) -> Kind;
}

/// Outcome of reading a backend target.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The target exists and holds this document.
    Found(SecretDocument),
    /// The target has never been written.
    NotFound,
}

/// A backend holding one whole document per target.
#[async_trait::async_trait]
pub(crate) trait DocumentBackend: fmt::Display + Send + Sync {
    /// Read the current document.
    async fn load(&self) -> Result<Lookup, StoreError>;

    /// Persist `document` (already pruned). `existed` is false only when
    /// the target is known to be absent; otherwise the backend re-reads
    /// whatever it keeps beside the document.
    async fn save(&self, document: &SecretDocument, existed: bool) -> Result<(), StoreError>;
}

/// The shared read-modify-write cycle for [`DocumentBackend`]s.
pub(crate) async fn upsert_document<B: DocumentBackend + ?Sized>(
    backend: &B,
    callback: UpsertCallback<'_>,
    default_seed: &SecretDocument,
) -> Result<(), StoreError> {
    let store = backend.to_string();
    let document_error = |source: DocumentError| StoreError::Document {
        store: store.clone(),
        source,
    };

    let (current, existed) = match backend.load().await? {
        Lookup::Found(document) => (document, true),
        Lookup::NotFound => {
            debug!(store = %store, "no secrets stored yet, using default seed");
            (default_seed.clone(), false)
        }
    };

    let current_yaml = current.to_yaml().map_err(document_error)?;
    let returned = callback(&current_yaml)?;
    let mut desired = SecretDocument::from_yaml(&returned).map_err(document_error)?;
    desired.prune_empty();

    if desired.to_yaml().map_err(document_error)? == current_yaml {
        debug!(store = %store, existed, "secrets unchanged, skipping write");
        return Ok(());
    }

    backend.save(&desired, existed).await?;
    info!(store = %store, created = !existed, "stored secrets");
    Ok(())
}

/// Blind overwrite for [`DocumentBackend`]s.
pub(crate) async fn replace_document<B: DocumentBackend + ?Sized>(
    backend: &B,
    document: &SecretDocument,
) -> Result<(), StoreError> {
    let mut pruned = document.clone();
    pruned.prune_empty();
    backend.save(&pruned, true).await?;
    info!(store = %backend, "replaced secrets");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), kind);
        }
    }

    #[test]
    fn kind_parsing_is_case_sensitive() {
        assert!(matches!(
            "Local".parse::<Kind>(),
            Err(ResolveError::UnknownKind { kind }) if kind == "Local"
        ));
        assert!("".parse::<Kind>().is_err());
        assert!("aws".parse::<Kind>().is_err());
    }
}
