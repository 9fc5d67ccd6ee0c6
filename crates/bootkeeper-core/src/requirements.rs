//! Deployment requirements: the subset of `jx-requirements.yml` that
//! decides where secrets live.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::RequirementsError;

/// File name searched for by [`Requirements::load_from_dir`].
pub const REQUIREMENTS_FILE_NAME: &str = "jx-requirements.yml";

/// The provider whose platform offers the managed secret service.
pub const GKE_PROVIDER: &str = "gke";

/// Secret storage strategy declared by the requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStorage {
    Local,
    Vault,
    Gsm,
}

/// Cluster coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    pub provider: String,
    pub project: String,
    pub region: String,
    pub zone: String,
    /// Namespace the platform is installed into.
    pub namespace: String,
}

/// Deployment requirements. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Requirements {
    pub cluster: ClusterConfig,
    pub secret_storage: Option<SecretStorage>,
}

impl Requirements {
    /// Parse requirements YAML. `source` names the text in errors.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementsError::Parse`] if the text is not valid.
    pub fn from_yaml_str(text: &str, source: &str) -> Result<Self, RequirementsError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| RequirementsError::Parse {
            path: source.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Find [`REQUIREMENTS_FILE_NAME`] in `dir` or the nearest ancestor
    /// and load it. `Ok(None)` if no ancestor has one.
    ///
    /// # Errors
    ///
    /// - [`RequirementsError::Read`] if the file cannot be read.
    /// - [`RequirementsError::Parse`] if it is not valid.
    pub fn load_from_dir(dir: &Path) -> Result<Option<(Self, PathBuf)>, RequirementsError> {
        let Some(path) = find_requirements_file(dir) else {
            return Ok(None);
        };
        let source = path.display().to_string();
        let text = fs::read_to_string(&path).map_err(|e| RequirementsError::Read {
            path: source.clone(),
            reason: e.to_string(),
        })?;
        let requirements = Self::from_yaml_str(&text, &source)?;
        Ok(Some((requirements, path)))
    }

    /// Region, falling back to zone. Empty if neither is set.
    pub fn location(&self) -> &str {
        if self.cluster.region.is_empty() {
            &self.cluster.zone
        } else {
            &self.cluster.region
        }
    }

    /// The declared install namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        Some(self.cluster.namespace.as_str()).filter(|ns| !ns.is_empty())
    }

    /// Whether the cluster runs on the platform with the managed secret
    /// service.
    pub fn is_gke(&self) -> bool {
        self.cluster.provider == GKE_PROVIDER
    }
}

fn find_requirements_file(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .map(|d| d.join(REQUIREMENTS_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
