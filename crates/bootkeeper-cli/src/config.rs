//! CLI configuration for `bootkeeper`.
//!
//! Loads backend coordinates and credentials from environment variables.
//! A backend's client is only built when its settings are present; using a
//! store kind whose client is missing fails at resolution time.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bootkeeper_core::{BackendClients, Requirements};
use bootkeeper_storage::{GsmClient, KubeSecretsClient, Replication, VaultHttpClient};

/// Namespace used when neither the environment nor the requirements set one.
const DEFAULT_NAMESPACE: &str = "jx";

/// Token mounted into pods running under a service account.
const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// CLI configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Namespace holding the cluster-local secret, overriding the
    /// requirements.
    pub namespace: Option<String>,
    /// Kubernetes API server URL.
    pub kube_api_url: String,
    /// Bearer token for the Kubernetes API.
    pub kube_token: Option<String>,
    /// Vault server address.
    pub vault_addr: Option<String>,
    /// Vault token.
    pub vault_token: Option<String>,
    /// Mount of the KV v2 engine.
    pub vault_mount: String,
    /// OAuth access token for the managed secret service.
    pub gcp_access_token: Option<String>,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl fmt::Debug for CliConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliConfig")
            .field("namespace", &self.namespace)
            .field("kube_api_url", &self.kube_api_url)
            .field("vault_addr", &self.vault_addr)
            .field("vault_mount", &self.vault_mount)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BOOTKEEPER_NAMESPACE`: namespace of the cluster secret (default:
    ///   `cluster.namespace` from the requirements, then `jx`)
    /// - `KUBERNETES_API_URL`: API server (default: `https://kubernetes.default.svc`)
    /// - `KUBERNETES_TOKEN`: API token (default: the service account token, if mounted)
    /// - `VAULT_ADDR`, `VAULT_TOKEN`: vault server and token
    /// - `VAULT_MOUNT`: KV v2 mount (default: `secret`)
    /// - `GOOGLE_OAUTH_ACCESS_TOKEN`: access token for the managed secret service
    /// - `BOOTKEEPER_LOG_LEVEL`: log filter (default: `info`)
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        if config.kube_token.is_none() {
            config.kube_token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN_PATH)
                .ok()
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty());
        }
        config
    }

    /// Build the configuration from an arbitrary variable lookup. Empty
    /// values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            namespace: var("BOOTKEEPER_NAMESPACE"),
            kube_api_url: var("KUBERNETES_API_URL")
                .unwrap_or_else(|| "https://kubernetes.default.svc".to_owned()),
            kube_token: var("KUBERNETES_TOKEN"),
            vault_addr: var("VAULT_ADDR"),
            vault_token: var("VAULT_TOKEN"),
            vault_mount: var("VAULT_MOUNT").unwrap_or_else(|| "secret".to_owned()),
            gcp_access_token: var("GOOGLE_OAUTH_ACCESS_TOKEN"),
            log_level: var("BOOTKEEPER_LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
        }
    }

    /// The namespace of the cluster secret for these requirements.
    pub fn namespace_for(&self, requirements: &Requirements) -> String {
        self.namespace
            .as_deref()
            .or_else(|| requirements.namespace())
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_owned()
    }

    /// Build a client for every backend whose settings are present.
    ///
    /// The managed secret service client also needs the project (and
    /// optionally the location) from the requirements.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured client rejects its settings.
    pub fn backend_clients(&self, requirements: &Requirements) -> Result<BackendClients> {
        let mut clients = BackendClients {
            namespace: self.namespace_for(requirements),
            ..BackendClients::default()
        };

        if let Some(token) = &self.kube_token {
            let client = KubeSecretsClient::new(&self.kube_api_url, token.clone())
                .context("failed to configure the Kubernetes client")?;
            clients.cluster = Some(Arc::new(client));
        }

        if let (Some(addr), Some(token)) = (&self.vault_addr, &self.vault_token) {
            let client = VaultHttpClient::new(addr, &self.vault_mount, token.clone())
                .context("failed to configure the vault client")?;
            clients.vault = Some(Arc::new(client));
        }

        let project = &requirements.cluster.project;
        if let Some(token) = self.gcp_access_token.as_ref().filter(|_| !project.is_empty()) {
            let replication = Replication::for_location(Some(requirements.location()));
            let client = GsmClient::new(project.clone(), replication, token.clone())
                .context("failed to configure the secret manager client")?;
            clients.secret_manager = Some(Arc::new(client));
        }

        Ok(clients)
    }
}

/// Load the requirements found in `dir` or an ancestor, or defaults.
///
/// # Errors
///
/// Returns an error if a requirements file exists but cannot be loaded.
pub fn load_requirements(dir: &Path) -> Result<Requirements> {
    match Requirements::load_from_dir(dir)? {
        Some((requirements, path)) => {
            tracing::debug!(path = %path.display(), "loaded requirements");
            Ok(requirements)
        }
        None => {
            tracing::debug!(dir = %dir.display(), "no requirements file found, using defaults");
            Ok(Requirements::default())
        }
    }
}
