//! Google Secret Manager client over the v1 REST API.
//!
//! Objects map one-to-one onto Secret Manager secrets inside a single
//! project. Writes add a new version (creating the secret first when it is
//! missing); reads always return the `latest` version.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{SecretManager, StorageError};

const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com/v1";

/// Replication policy used when a secret is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replication {
    /// Let the service choose where to replicate.
    Automatic,
    /// Pin replicas to a single location (region).
    UserManaged { location: String },
}

impl Replication {
    /// Pin to `location` when one is given, otherwise automatic.
    #[must_use]
    pub fn for_location(location: Option<&str>) -> Self {
        match location {
            Some(l) if !l.is_empty() => Self::UserManaged {
                location: l.to_owned(),
            },
            _ => Self::Automatic,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Automatic => json!({ "automatic": {} }),
            Self::UserManaged { location } => json!({
                "userManaged": { "replicas": [{ "location": location }] }
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: Payload,
}

#[derive(Debug, Deserialize)]
struct Payload {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    secrets: Vec<SecretName>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretName {
    name: String,
}

/// A [`SecretManager`] implementation backed by Google Secret Manager.
#[derive(Clone)]
pub struct GsmClient {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    replication: Replication,
    token: String,
}

impl std::fmt::Debug for GsmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsmClient")
            .field("project", &self.project)
            .field("replication", &self.replication)
            .finish_non_exhaustive()
    }
}

impl GsmClient {
    /// Create a client for `project` using an OAuth access token.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the project or token is empty or
    /// the HTTP client cannot be built.
    pub fn new(
        project: impl Into<String>,
        replication: Replication,
        token: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let project = project.into();
        let token = token.into();
        if project.is_empty() || token.is_empty() {
            return Err(StorageError::Config {
                reason: "secret manager project and access token are required".to_owned(),
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
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            project,
            replication,
            token,
        })
    }

    /// Point the client at a different API endpoint (emulators, proxies).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        endpoint.trim_end_matches('/').clone_into(&mut self.endpoint);
        self
    }

    fn secrets_url(&self) -> String {
        format!("{}/projects/{}/secrets", self.endpoint, self.project)
    }

    fn secret_url(&self, name: &str) -> String {
        format!("{}/{}", self.secrets_url(), urlencoding::encode(name))
    }

    async fn create_secret(&self, name: &str) -> Result<(), StorageError> {
        let resp = self
            .http
            .post(format!(
                "{}?secretId={}",
                self.secrets_url(),
                urlencoding::encode(name)
            ))
            .bearer_auth(&self.token)
            .json(&json!({ "replication": self.replication.to_json() }))
            .send()
            .await
            .map_err(|e| write_error(name, &e))?;
        // A concurrent creator beat us to it; the version add still applies.
        if resp.status() == StatusCode::CONFLICT || resp.status().is_success() {
            return Ok(());
        }
        Err(StorageError::Write {
            target: name.to_owned(),
            reason: failure_reason(resp).await,
        })
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> Result<StatusCode, StorageError> {
        let resp = self
            .http
            .post(format!("{}:addVersion", self.secret_url(name)))
            .bearer_auth(&self.token)
            .json(&json!({ "payload": { "data": STANDARD.encode(payload) } }))
            .send()
            .await
            .map_err(|e| write_error(name, &e))?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(status);
        }
        Err(StorageError::Write {
            target: name.to_owned(),
            reason: failure_reason(resp).await,
        })
    }
}

fn write_error(name: &str, e: &reqwest::Error) -> StorageError {
    StorageError::Write {
        target: name.to_owned(),
        reason: e.to_string(),
    }
}

async fn failure_reason(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    format!("secret manager returned {status}: {body}")
}

/// Strip `projects/<p>/secrets/` from a fully qualified secret name.
fn short_name(full: &str) -> &str {
    full.rsplit_once('/').map_or(full, |(_, short)| short)
}

#[async_trait::async_trait]
impl SecretManager for GsmClient {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(self.secrets_url())
                .bearer_auth(&self.token)
                .query(&[("filter", format!("name:{prefix}"))]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let resp = request.send().await.map_err(|e| StorageError::List {
                prefix: prefix.to_owned(),
                reason: e.to_string(),
            })?;
            if !resp.status().is_success() {
                return Err(StorageError::List {
                    prefix: prefix.to_owned(),
                    reason: failure_reason(resp).await,
                });
            }
            let page: ListResponse = resp.json().await.map_err(|e| StorageError::List {
                prefix: prefix.to_owned(),
                reason: e.to_string(),
            })?;
            // The filter is a substring match; keep true prefixes only.
            names.extend(
                page.secrets
                    .iter()
                    .map(|s| short_name(&s.name))
                    .filter(|n| n.starts_with(prefix))
                    .map(str::to_owned),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        names.sort();
        Ok(names)
    }

    async fn access(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let resp = self
            .http
            .get(format!("{}/versions/latest:access", self.secret_url(name)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StorageError::Read {
                target: name.to_owned(),
                reason: e.to_string(),
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StorageError::Read {
                target: name.to_owned(),
                reason: failure_reason(resp).await,
            });
        }
        let body: AccessResponse = resp.json().await.map_err(|e| StorageError::InvalidData {
            target: name.to_owned(),
            reason: e.to_string(),
        })?;
        let bytes = STANDARD
            .decode(body.payload.data.as_bytes())
            .map_err(|e| StorageError::InvalidData {
                target: name.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Some(bytes))
    }

    async fn put(&self, name: &str, payload: &[u8]) -> Result<(), StorageError> {
        if self.add_version(name, payload).await? == StatusCode::NOT_FOUND {
            debug!(secret = %name, "secret does not exist yet, creating it");
            self.create_secret(name).await?;
            let status = self.add_version(name, payload).await?;
            if status == StatusCode::NOT_FOUND {
                return Err(StorageError::Write {
                    target: name.to_owned(),
                    reason: "secret not found after create".to_owned(),
                });
            }
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let resp = self
            .http
            .delete(self.secret_url(name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                target: name.to_owned(),
                reason: e.to_string(),
            })?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(StorageError::Delete {
            target: name.to_owned(),
            reason: failure_reason(resp).await,
        })
    }

    fn describe(&self) -> String {
        match &self.replication {
            Replication::Automatic => format!("secret manager project {}", self.project),
            Replication::UserManaged { location } => {
                format!("secret manager project {} ({location})", self.project)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_missing_project() {
        let result = GsmClient::new("", Replication::Automatic, "token");
        assert!(matches!(result, Err(StorageError::Config { .. })));
    }

    #[test]
    fn replication_follows_location() {
        assert_eq!(Replication::for_location(None), Replication::Automatic);
        assert_eq!(Replication::for_location(Some("")), Replication::Automatic);
        assert_eq!(
            Replication::for_location(Some("europe-west1")),
            Replication::UserManaged {
                location: "europe-west1".to_owned()
            }
        );
    }

    #[test]
    fn replication_json_shapes() {
        assert_eq!(
            Replication::Automatic.to_json(),
            json!({ "automatic": {} })
        );
        let pinned = Replication::UserManaged {
            location: "us-east1".to_owned(),
        };
        assert_eq!(
            pinned.to_json()["userManaged"]["replicas"][0]["location"],
            "us-east1"
        );
    }

    #[test]
    fn secret_url_uses_project_and_endpoint() {
        let client = GsmClient::new("my-proj", Replication::Automatic, "t")
            .unwrap()
            .with_endpoint("http://localhost:9090/v1/");
        assert_eq!(
            client.secret_url("boot-secrets-adminUser"),
            "http://localhost:9090/v1/projects/my-proj/secrets/boot-secrets-adminUser"
        );
    }

    #[test]
    fn short_name_strips_project_path() {
        assert_eq!(short_name("projects/p/secrets/boot-x"), "boot-x");
        assert_eq!(short_name("boot-x"), "boot-x");
    }

    #[test]
    fn describe_includes_location() {
        let client = GsmClient::new(
            "my-proj",
            Replication::UserManaged {
                location: "us-east1".to_owned(),
            },
            "secret-token",
        )
        .unwrap();
        let text = client.describe();
        assert!(text.contains("my-proj"));
        assert!(text.contains("us-east1"));
        assert!(!text.contains("secret-token"));
    }
}
