//! Vault KV version 2 client over HTTP.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::{StorageError, VaultFields, VaultKv};

#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Debug, Deserialize)]
struct ReadData {
    data: Option<VaultFields>,
}

/// A [`VaultKv`] implementation backed by a KV v2 mount.
#[derive(Clone)]
pub struct VaultHttpClient {
    http: reqwest::Client,
    addr: String,
    mount: String,
    token: String,
}

impl std::fmt::Debug for VaultHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultHttpClient")
            .field("addr", &self.addr)
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

impl VaultHttpClient {
    /// Create a client for the vault at `addr`, using the KV v2 engine
    /// mounted at `mount`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if any setting is empty or the HTTP
    /// client cannot be built.
    pub fn new(addr: &str, mount: &str, token: impl Into<String>) -> Result<Self, StorageError> {
        let token = token.into();
        let addr = addr.trim_end_matches('/').to_owned();
        let mount = mount.trim_matches('/').to_owned();
        if addr.is_empty() || mount.is_empty() || token.is_empty() {
            return Err(StorageError::Config {
                reason: "vault address, mount and token are required".to_owned(),
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
            addr,
            mount,
            token,
        })
    }

    fn data_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/v1/{}/data/{}", self.addr, self.mount, encoded.join("/"))
    }
}

#[async_trait::async_trait]
impl VaultKv for VaultHttpClient {
    async fn read(&self, path: &str) -> Result<Option<VaultFields>, StorageError> {
        let resp = self
            .http
            .get(self.data_url(path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| StorageError::Read {
                target: path.to_owned(),
                reason: e.to_string(),
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Read {
                target: path.to_owned(),
                reason: format!("vault returned {status}: {body}"),
            });
        }
        let body: ReadResponse = resp.json().await.map_err(|e| StorageError::InvalidData {
            target: path.to_owned(),
            reason: e.to_string(),
        })?;
        // A soft-deleted latest version comes back with `data: null`.
        Ok(body.data.data)
    }

    async fn write(&self, path: &str, fields: &VaultFields) -> Result<(), StorageError> {
        let resp = self
            .http
            .post(self.data_url(path))
            .header("X-Vault-Token", &self.token)
            .json(&json!({ "data": fields }))
            .send()
            .await
            .map_err(|e| StorageError::Write {
                target: path.to_owned(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Write {
                target: path.to_owned(),
                reason: format!("vault returned {status}: {body}"),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("vault at {} (mount {})", self.addr, self.mount)
    }
}
