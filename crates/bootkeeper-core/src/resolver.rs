//! Picks the secret store for a cluster and builds it.
//!
//! The decision, in order:
//!
//! 1. An explicit kind always wins (`gsm` still needs a GKE cluster).
//! 2. A declared `secretStorage` of `vault` or `gsm` (`gsm` needs GKE).
//! 3. On GKE, an existing cluster-local secret means the installation was
//!    already bootstrapped there (`local`); otherwise `gsm`.
//! 4. Everything else is `local`.

use std::fmt;
use std::sync::Arc;

use bootkeeper_storage::{ClusterSecrets, SecretManager, VaultKv};
use tracing::{debug, info};

use crate::error::ResolveError;
use crate::requirements::{GKE_PROVIDER, Requirements, SecretStorage};
use crate::store::{
    ClusterResourceStore, CompositeStore, InMemoryStore, Kind, LOCAL_SECRET_NAME,
    ManagedSecretServiceStore, SecretStore, VaultPathStore,
};

/// Authenticated client handles, one per backend. A handle is only
/// needed for the kinds that use it.
#[derive(Clone, Default)]
pub struct BackendClients {
    /// Namespace holding the cluster-local secret.
    pub namespace: String,
    pub cluster: Option<Arc<dyn ClusterSecrets>>,
    pub secret_manager: Option<Arc<dyn SecretManager>>,
    pub vault: Option<Arc<dyn VaultKv>>,
}

impl fmt::Debug for BackendClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClients")
            .field("namespace", &self.namespace)
            .field("cluster", &self.cluster.as_ref().map(|c| c.describe()))
            .field(
                "secret_manager",
                &self.secret_manager.as_ref().map(|c| c.describe()),
            )
            .field("vault", &self.vault.as_ref().map(|c| c.describe()))
            .finish()
    }
}

/// Decides which [`Kind`] of store to use and constructs it.
#[derive(Debug)]
pub struct KindResolver<'a> {
    requirements: &'a Requirements,
    clients: BackendClients,
    explicit: Option<Kind>,
}

impl<'a> KindResolver<'a> {
    pub fn new(requirements: &'a Requirements, clients: BackendClients) -> Self {
        Self {
            requirements,
            clients,
            explicit: None,
        }
    }

    /// Use `kind` instead of deciding from the requirements.
    #[must_use]
    pub fn with_kind(mut self, kind: Option<Kind>) -> Self {
        self.explicit = kind;
        self
    }

    /// Decide the kind without building a store.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::Configuration`] if `gsm` is requested or declared
    ///   for a provider other than GKE, or the probe needs a cluster client
    ///   that was not configured.
    /// - [`ResolveError::Probe`] if the existence probe fails.
    pub async fn decide_kind(&self) -> Result<Kind, ResolveError> {
        if let Some(kind) = self.explicit {
            if kind == Kind::Gsm {
                self.require_gke()?;
            }
            debug!(kind = %kind, "using explicit secret store kind");
            return Ok(kind);
        }

        match self.requirements.secret_storage {
            Some(SecretStorage::Vault) => return Ok(Kind::Vault),
            Some(SecretStorage::Gsm) => {
                self.require_gke()?;
                return Ok(Kind::Gsm);
            }
            Some(SecretStorage::Local) | None => {}
        }

        if self.requirements.is_gke() {
            let cluster = self.cluster()?;
            let existing = cluster
                .get(&self.clients.namespace, LOCAL_SECRET_NAME)
                .await
                .map_err(|source| ResolveError::Probe { source })?;
            if existing.is_some() {
                debug!(namespace = %self.clients.namespace, "found existing cluster secret");
                return Ok(Kind::Local);
            }
            debug!("no cluster secret yet, bootstrapping into the managed secret service");
            return Ok(Kind::Gsm);
        }

        Ok(Kind::Local)
    }

    /// Decide the kind and build its store.
    ///
    /// `gsm` builds a [`CompositeStore`] with the managed secret service as
    /// primary and the cluster-local secret as an advisory mirror.
    ///
    /// # Errors
    ///
    /// As [`decide_kind`](Self::decide_kind), plus
    /// [`ResolveError::Configuration`] if the chosen kind's client handle
    /// is missing or `gsm` has no project.
    pub async fn resolve(&self) -> Result<Box<dyn SecretStore>, ResolveError> {
        let kind = self.decide_kind().await?;
        let store = self.build(kind)?;
        info!(kind = %kind, store = %store, "resolved secret store");
        Ok(store)
    }

    fn build(&self, kind: Kind) -> Result<Box<dyn SecretStore>, ResolveError> {
        let store: Box<dyn SecretStore> = match kind {
            Kind::Local => Box::new(self.local_store()?),
            Kind::Vault => {
                let vault = self.clients.vault.clone().ok_or_else(|| missing("vault"))?;
                Box::new(VaultPathStore::new(vault))
            }
            Kind::Gsm => {
                if self.requirements.cluster.project.is_empty() {
                    return Err(ResolveError::Configuration {
                        reason: "the managed secret service needs cluster.project in the requirements"
                            .to_owned(),
                    });
                }
                let service = self
                    .clients
                    .secret_manager
                    .clone()
                    .ok_or_else(|| missing("managed secret service"))?;
                Box::new(CompositeStore::new(
                    Box::new(ManagedSecretServiceStore::new(service)),
                    Box::new(self.local_store()?),
                ))
            }
            Kind::Fake => Box::new(InMemoryStore::default()),
        };
        Ok(store)
    }

    fn local_store(&self) -> Result<ClusterResourceStore, ResolveError> {
        Ok(ClusterResourceStore::new(
            self.cluster()?,
            self.clients.namespace.clone(),
        ))
    }

    fn cluster(&self) -> Result<Arc<dyn ClusterSecrets>, ResolveError> {
        self.clients.cluster.clone().ok_or_else(|| missing("cluster"))
    }

    fn require_gke(&self) -> Result<(), ResolveError> {
        if self.requirements.is_gke() {
            return Ok(());
        }
        let provider = &self.requirements.cluster.provider;
        Err(ResolveError::Configuration {
            reason: format!(
                "the managed secret service requires cluster provider '{GKE_PROVIDER}', not '{provider}'"
            ),
        })
    }
}

fn missing(client: &str) -> ResolveError {
    ResolveError::Configuration {
        reason: format!("no {client} client is configured"),
    }
}
