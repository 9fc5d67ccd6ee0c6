//! In-memory store for tests and the `fake` kind.
//!
//! All instances share one process-wide map keyed by path, so two stores
//! built for the same path see each other's writes the way two CLI calls
//! would see a shared remote store. Data is lost when the process exits.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, PoisonError};

use crate::document::SecretDocument;
use crate::error::StoreError;

use super::{
    DocumentBackend, Kind, Lookup, SecretStore, UpsertCallback, replace_document, upsert_document,
};

/// Path used when the caller does not pick one.
pub const DEFAULT_MEMORY_PATH: &str = "secrets";

static SHARED: LazyLock<Mutex<HashMap<String, SecretDocument>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// A store backed by the process-wide in-memory map.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    path: String,
}

impl InMemoryStore {
    /// A store for the given path in the shared map.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The stored document, if this path has been written.
    pub fn snapshot(&self) -> Option<SecretDocument> {
        let shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        shared.get(&self.path).cloned()
    }

    /// Replace the stored document directly, bypassing the upsert cycle.
    pub fn seed(&self, document: SecretDocument) {
        let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        shared.insert(self.path.clone(), document);
    }

    /// Forget this path.
    pub fn clear(&self) {
        let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        shared.remove(&self.path);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_PATH)
    }
}

impl fmt::Display for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in-memory secrets at '{}'", self.path)
    }
}

#[async_trait::async_trait]
impl DocumentBackend for InMemoryStore {
    async fn load(&self) -> Result<Lookup, StoreError> {
        Ok(self.snapshot().map_or(Lookup::NotFound, Lookup::Found))
    }

    async fn save(&self, document: &SecretDocument, _existed: bool) -> Result<(), StoreError> {
        self.seed(document.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl SecretStore for InMemoryStore {
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
        Kind::Fake
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> SecretDocument {
        SecretDocument::from_yaml(yaml).unwrap()
    }

    #[tokio::test]
    async fn untouched_seed_is_not_written() {
        let store = InMemoryStore::new("memory-tests/seed");
        store.clear();
        let seed = doc("secrets:\n  hmacToken: h\n");
        let mut seen = String::new();
        store
            .upsert_secrets(
                &mut |current| {
                    current.clone_into(&mut seen);
                    Ok(current.to_owned())
                },
                &seed,
            )
            .await
            .unwrap();
        assert_eq!(seen, "secrets:\n  hmacToken: h\n");
        assert_eq!(store.snapshot(), None);
    }

    #[tokio::test]
    async fn first_change_persists_seed_with_edit() {
        let store = InMemoryStore::new("memory-tests/seed-edit");
        store.clear();
        store
            .upsert_secrets(
                &mut |current| Ok(format!("{current}  adminUser:\n    username: admin\n")),
                &doc("secrets:\n  hmacToken: h\n"),
            )
            .await
            .unwrap();
        assert_eq!(
            store.snapshot(),
            Some(doc("secrets:\n  adminUser:\n    username: admin\n  hmacToken: h\n"))
        );
    }

    #[tokio::test]
    async fn stores_for_same_path_share_state() {
        let writer = InMemoryStore::new("memory-tests/shared");
        let reader = InMemoryStore::new("memory-tests/shared");
        writer.clear();
        writer
            .upsert_secrets(&mut |_| Ok("a: b\n".to_owned()), &SecretDocument::new())
            .await
            .unwrap();
        assert_eq!(reader.snapshot(), Some(doc("a: b\n")));
    }

    #[tokio::test]
    async fn callback_error_leaves_state_untouched() {
        let store = InMemoryStore::new("memory-tests/callback-error");
        store.seed(doc("a: b\n"));
        let result = store
            .upsert_secrets(
                &mut |_| Err(StoreError::callback("user aborted")),
                &SecretDocument::new(),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Callback { .. })));
        assert_eq!(store.snapshot(), Some(doc("a: b\n")));
    }

    #[tokio::test]
    async fn invalid_callback_output_is_a_document_error() {
        let store = InMemoryStore::new("memory-tests/invalid-output");
        store.seed(doc("a: b\n"));
        let result = store
            .upsert_secrets(&mut |_| Ok("- not\n- a map\n".to_owned()), &SecretDocument::new())
            .await;
        assert!(matches!(result, Err(StoreError::Document { .. })));
    }

    #[test]
    fn display_names_the_path() {
        assert_eq!(
            InMemoryStore::new("x").to_string(),
            "in-memory secrets at 'x'"
        );
        assert_eq!(InMemoryStore::default().kind(), Kind::Fake);
    }
}
