//! Kubernetes core/v1 Secrets client over HTTP.
//!
//! Talks to the API server directly with a bearer token. Field values are
//! base64-encoded on the wire, as the Secrets API requires.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ClusterSecrets, SecretResource, StorageError};

/// Wire shape of a core/v1 Secret, restricted to the fields we touch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretBody {
    api_version: String,
    kind: String,
    metadata: Metadata,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    secret_type: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    name: String,
    namespace: String,
}

/// A [`ClusterSecrets`] implementation backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretsClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl std::fmt::Debug for KubeSecretsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretsClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl KubeSecretsClient {
    /// Create a client for the API server at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the URL or token is empty or the
    /// HTTP client cannot be built.
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self, StorageError> {
        let token = token.into();
        let api_url = api_url.trim_end_matches('/').to_owned();
        if api_url.is_empty() || token.is_empty() {
            return Err(StorageError::Config {
                reason: "kubernetes API URL and token are required".to_owned(),
            });
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("bootkeeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Config {
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    fn collection_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{namespace}/secrets", self.api_url)
    }

    fn resource_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/{name}", self.collection_url(namespace))
    }
}

fn encode(resource: &SecretResource) -> SecretBody {
    SecretBody {
        api_version: "v1".to_owned(),
        kind: "Secret".to_owned(),
        metadata: Metadata {
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
        },
        secret_type: Some("Opaque".to_owned()),
        data: resource
            .data
            .iter()
            .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
            .collect(),
    }
}

fn decode(body: SecretBody) -> Result<SecretResource, StorageError> {
    let target = format!("{}/{}", body.metadata.namespace, body.metadata.name);
    let mut data = BTreeMap::new();
    for (key, value) in body.data {
        let bytes = STANDARD
            .decode(value.as_bytes())
            .map_err(|e| StorageError::InvalidData {
                target: format!("{target}#{key}"),
                reason: e.to_string(),
            })?;
        data.insert(key, bytes);
    }
    Ok(SecretResource {
        name: body.metadata.name,
        namespace: body.metadata.namespace,
        data,
    })
}

async fn failure_reason(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    format!("API server returned {status}: {body}")
}

#[async_trait::async_trait]
impl ClusterSecrets for KubeSecretsClient {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretResource>, StorageError> {
        let target = format!("{namespace}/{name}");
        let resp = self
            .http
            .get(self.resource_url(namespace, name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StorageError::Read {
                target: target.clone(),
                reason: e.to_string(),
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(secret = %target, "secret not found");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StorageError::Read {
                target,
                reason: failure_reason(resp).await,
            });
        }
        let body: SecretBody = resp.json().await.map_err(|e| StorageError::InvalidData {
            target,
            reason: e.to_string(),
        })?;
        decode(body).map(Some)
    }

    async fn create(&self, resource: &SecretResource) -> Result<(), StorageError> {
        let target = format!("{}/{}", resource.namespace, resource.name);
        let resp = self
            .http
            .post(self.collection_url(&resource.namespace))
            .bearer_auth(&self.token)
            .json(&encode(resource))
            .send()
            .await
            .map_err(|e| StorageError::Write {
                target: target.clone(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(StorageError::Write {
                target,
                reason: failure_reason(resp).await,
            });
        }
        Ok(())
    }

    async fn update(&self, resource: &SecretResource) -> Result<(), StorageError> {
        let target = format!("{}/{}", resource.namespace, resource.name);
        let resp = self
            .http
            .put(self.resource_url(&resource.namespace, &resource.name))
            .bearer_auth(&self.token)
            .json(&encode(resource))
            .send()
            .await
            .map_err(|e| StorageError::Write {
                target: target.clone(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(StorageError::Write {
                target,
                reason: failure_reason(resp).await,
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("kubernetes at {}", self.api_url)
    }
}
