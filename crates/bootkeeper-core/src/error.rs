//! Error types for `bootkeeper-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Store errors always name the store they came from. No variant
//! ever carries a secret value, only paths, object names and reasons.

use bootkeeper_storage::StorageError;

/// Errors from parsing, serializing or editing a secret document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The text is not a valid YAML document.
    #[error("failed to parse secrets YAML: {reason}")]
    Parse { reason: String },

    /// The document could not be rendered as YAML.
    #[error("failed to serialize secrets YAML: {reason}")]
    Serialize { reason: String },

    /// The document root (or an intermediate node) is not a mapping.
    #[error("expected a mapping at '{path}'")]
    NotATree { path: String },

    /// A mapping key could not be used as a path segment.
    #[error("unsupported key at '{path}': {reason}")]
    InvalidKey { path: String, reason: String },
}

/// Errors from a secret store's upsert cycle.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed to read or write.
    #[error("{store}: {operation} failed: {source}")]
    Persistence {
        store: String,
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    /// The stored or returned document could not be handled.
    #[error("{store}: {source}")]
    Document {
        store: String,
        #[source]
        source: DocumentError,
    },

    /// The upsert callback rejected the current document.
    #[error("secrets callback failed: {reason}")]
    Callback { reason: String },

    /// Two document paths map to the same backend object name.
    #[error("{store}: paths '{first}' and '{second}' both map to object '{object}'")]
    NameCollision {
        store: String,
        object: String,
        first: String,
        second: String,
    },
}

impl StoreError {
    /// Wrap a callback failure.
    pub fn callback(reason: impl std::fmt::Display) -> Self {
        Self::Callback {
            reason: reason.to_string(),
        }
    }
}

/// Errors from deciding or constructing the store for a cluster.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The requested backend cannot be used with this configuration.
    #[error("secret store configuration error: {reason}")]
    Configuration { reason: String },

    /// The kind string is not one of the supported kinds.
    #[error("unknown secret store kind '{kind}' (expected one of: local, vault, gsm, fake)")]
    UnknownKind { kind: String },

    /// Probing the cluster for an existing local resource failed.
    #[error("failed to probe for existing cluster secrets: {source}")]
    Probe {
        #[source]
        source: StorageError,
    },
}

/// A required secret entry is missing or empty.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The first required path (in declared order) with no value.
    #[error("missing secret entry: {path}")]
    Missing { path: &'static str },

    /// The secrets text could not be parsed.
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Errors from loading the deployment requirements file.
#[derive(Debug, thiserror::Error)]
pub enum RequirementsError {
    /// The file exists but could not be read.
    #[error("failed to read requirements file '{path}': {reason}")]
    Read { path: String, reason: String },

    /// The file is not a valid requirements document.
    #[error("failed to parse requirements file '{path}': {reason}")]
    Parse { path: String, reason: String },
}

/// The install gate refused to proceed.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The secrets could not be loaded.
    #[error("failed to load secrets: {0}")]
    Store(#[from] StoreError),

    /// The secrets are incomplete.
    #[error("secrets are not ready for install: {0}")]
    Invalid(#[from] VerifyError),
}
