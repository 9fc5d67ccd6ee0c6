//! Operator workflows built on the upsert cycle.
//!
//! Each workflow is one [`SecretStore::upsert_secrets`] call with a
//! purpose-built callback, so every backend gets the same behavior.

use bootkeeper_storage::{ClusterSecrets, StorageError};
use tracing::info;

use crate::document::SecretDocument;
use crate::error::{DocumentError, GateError, StoreError, VerifyError};
use crate::store::SecretStore;
use crate::verify;

pub use crate::store::document_from_resource;

/// Load the current secrets as canonical YAML.
///
/// A never-written store exports [`SecretDocument::default_seed`] and is
/// left untouched.
///
/// # Errors
///
/// Any [`StoreError`] from the store.
pub async fn export(store: &dyn SecretStore) -> Result<String, StoreError> {
    let mut exported = String::new();
    store
        .upsert_secrets(
            &mut |current| {
                current.clone_into(&mut exported);
                Ok(current.to_owned())
            },
            &SecretDocument::default_seed(),
        )
        .await?;
    info!(store = %store, "exported secrets");
    Ok(exported)
}

/// Replace the stored secrets with `text`.
///
/// # Errors
///
/// [`StoreError::Document`] if `text` is not a secrets document (nothing
/// is loaded or written), otherwise any [`StoreError`] from the store.
pub async fn import(store: &dyn SecretStore, text: &str) -> Result<(), StoreError> {
    let document = parse_for(store, text)?;
    let desired = render_for(store, &document)?;
    store
        .upsert_secrets(
            &mut |_| Ok(desired.clone()),
            &SecretDocument::default_seed(),
        )
        .await?;
    info!(store = %store, "imported secrets");
    Ok(())
}

/// Overlay `overlay_text` onto the stored secrets, keeping every entry the
/// overlay does not mention.
///
/// # Errors
///
/// As [`import`].
pub async fn merge(store: &dyn SecretStore, overlay_text: &str) -> Result<(), StoreError> {
    let overlay = parse_for(store, overlay_text)?;
    let identity = store.to_string();
    store
        .upsert_secrets(
            &mut |current| {
                let base = SecretDocument::from_yaml(current).map_err(|source| {
                    StoreError::Document {
                        store: identity.clone(),
                        source,
                    }
                })?;
                SecretDocument::combine_overlay(&base, &overlay)
                    .to_yaml()
                    .map_err(|source| StoreError::Document {
                        store: identity.clone(),
                        source,
                    })
            },
            &SecretDocument::default_seed(),
        )
        .await?;
    info!(store = %store, "merged secrets");
    Ok(())
}

/// Install gate: load the stored secrets and check they are complete.
///
/// A never-written store yields an empty document and fails verification.
///
/// # Errors
///
/// - [`GateError::Store`] if the secrets cannot be loaded.
/// - [`GateError::Invalid`] naming the first missing entry.
pub async fn verify_store(store: &dyn SecretStore) -> Result<SecretDocument, GateError> {
    let mut loaded = String::new();
    store
        .upsert_secrets(
            &mut |current| {
                current.clone_into(&mut loaded);
                Ok(current.to_owned())
            },
            &SecretDocument::new(),
        )
        .await?;
    let document = SecretDocument::from_yaml(&loaded).map_err(VerifyError::from)?;
    verify::verify(&document)?;
    info!(store = %store, "secrets are valid");
    Ok(document)
}

/// Render the document held by a cluster secret, whatever layout the
/// secret uses.
///
/// # Errors
///
/// - [`StoreError::Persistence`] if the secret cannot be read, does not
///   exist or holds no data.
/// - [`StoreError::Document`] if its content is not a secrets document.
pub async fn yaml_from_cluster_secret(
    client: &dyn ClusterSecrets,
    namespace: &str,
    name: &str,
) -> Result<String, StoreError> {
    let store = format!("cluster secret {namespace}/{name} on {}", client.describe());
    let unreadable = |reason: &str| StoreError::Persistence {
        store: store.clone(),
        operation: "read",
        source: StorageError::Read {
            target: format!("{namespace}/{name}"),
            reason: reason.to_owned(),
        },
    };

    let resource = client
        .get(namespace, name)
        .await
        .map_err(|source| StoreError::Persistence {
            store: store.clone(),
            operation: "read",
            source,
        })?
        .ok_or_else(|| unreadable("secret does not exist"))?;
    if resource.data.is_empty() {
        return Err(unreadable("secret has no data"));
    }
    let document_error = |source| StoreError::Document {
        store: store.clone(),
        source,
    };
    document_from_resource(&resource)
        .map_err(document_error)?
        .to_yaml()
        .map_err(document_error)
}

/// The pipeline bot's `(username, token)` for authenticated git access.
///
/// # Errors
///
/// [`VerifyError::Missing`] if either entry is absent or empty.
pub fn pipeline_user_credentials(
    document: &SecretDocument,
) -> Result<(String, String), VerifyError> {
    let required = |path: &'static str| {
        document
            .get_text(path)
            .filter(|v| !v.is_empty())
            .ok_or(VerifyError::Missing { path })
    };
    Ok((
        required("secrets.pipelineUser.username")?,
        required("secrets.pipelineUser.token")?,
    ))
}

fn parse_for(store: &dyn SecretStore, text: &str) -> Result<SecretDocument, StoreError> {
    SecretDocument::from_yaml(text).map_err(|source| StoreError::Document {
        store: store.to_string(),
        source,
    })
}

fn render_for(store: &dyn SecretStore, document: &SecretDocument) -> Result<String, StoreError> {
    document.to_yaml().map_err(|source: DocumentError| StoreError::Document {
        store: store.to_string(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use bootkeeper_storage::{MemoryClusterSecrets, MemoryVault, SecretResource};

    use super::*;
    use crate::store::{InMemoryStore, LOCAL_SECRET_FIELD, VaultPathStore};

    const COMPLETE: &str = "\
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

    fn fresh(path: &str) -> InMemoryStore {
        let store = InMemoryStore::new(path);
        store.clear();
        store
    }

    #[tokio::test]
    async fn export_of_fresh_store_is_empty_document() {
        let store = fresh("workflow-tests/export-fresh");
        assert_eq!(export(&store).await.unwrap(), "{}\n");
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn import_rejects_invalid_text_without_touching_store() {
        let vault = MemoryVault::new();
        let store = VaultPathStore::new(Arc::new(vault.clone()));
        let result = import(&store, "secrets: [unclosed").await;
        assert!(matches!(result, Err(StoreError::Document { .. })));
        assert_eq!(vault.write_attempts(), 0);
    }

    #[tokio::test]
    async fn merge_keeps_siblings() {
        let store = fresh("workflow-tests/merge");
        import(&store, "secrets:\n  adminUser:\n    username: admin\n")
            .await
            .unwrap();
        merge(&store, "secrets:\n  adminUser:\n    password: p\n")
            .await
            .unwrap();
        assert_eq!(
            export(&store).await.unwrap(),
            "secrets:\n  adminUser:\n    password: p\n    username: admin\n"
        );
    }

    #[tokio::test]
    async fn merge_with_empty_value_keeps_existing_value() {
        let store = fresh("workflow-tests/merge-empty");
        import(&store, "secrets:\n  hmacToken: h\n").await.unwrap();
        merge(&store, "secrets:\n  hmacToken: \"\"\n").await.unwrap();
        assert_eq!(export(&store).await.unwrap(), "secrets:\n  hmacToken: h\n");
    }

    #[tokio::test]
    async fn verify_store_gates_on_completeness() {
        let store = fresh("workflow-tests/verify");
        assert!(matches!(
            verify_store(&store).await,
            Err(GateError::Invalid(VerifyError::Missing {
                path: "secrets.adminUser.username"
            }))
        ));
        import(&store, COMPLETE).await.unwrap();
        let document = verify_store(&store).await.unwrap();
        assert_eq!(
            document.get_text("secrets.hmacToken").as_deref(),
            Some("h")
        );
    }

    #[tokio::test]
    async fn yaml_from_flat_cluster_secret() {
        let cluster = MemoryClusterSecrets::with_resources([SecretResource::new("jx", "boot")
            .with_field("hmacToken", "h")
            .with_field("adminUser.username", "admin")]);
        let yaml = yaml_from_cluster_secret(&cluster, "jx", "boot").await.unwrap();
        assert_eq!(
            yaml,
            "secrets:\n  adminUser:\n    username: admin\n  hmacToken: h\n"
        );
    }

    #[tokio::test]
    async fn yaml_from_document_field() {
        let cluster = MemoryClusterSecrets::with_resources([
            SecretResource::new("jx", "boot").with_field(LOCAL_SECRET_FIELD, COMPLETE)
        ]);
        let yaml = yaml_from_cluster_secret(&cluster, "jx", "boot").await.unwrap();
        assert_eq!(yaml, COMPLETE);
    }

    #[tokio::test]
    async fn yaml_from_missing_or_empty_secret_fails() {
        let cluster = MemoryClusterSecrets::with_resources([SecretResource::new("jx", "empty")]);
        for name in ["empty", "absent"] {
            let result = yaml_from_cluster_secret(&cluster, "jx", name).await;
            assert!(matches!(result, Err(StoreError::Persistence { .. })), "{name}");
        }
    }

    #[test]
    fn pipeline_credentials_need_username_and_token() {
        let document = SecretDocument::from_yaml(COMPLETE).unwrap();
        assert_eq!(
            pipeline_user_credentials(&document).unwrap(),
            ("bot".to_owned(), "t".to_owned())
        );

        let partial = SecretDocument::from_yaml("secrets:\n  pipelineUser:\n    username: bot\n").unwrap();
        assert!(matches!(
            pipeline_user_credentials(&partial),
            Err(VerifyError::Missing { path: "secrets.pipelineUser.token" })
        ));
    }
}
