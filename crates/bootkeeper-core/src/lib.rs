//! Core library for `bootkeeper`.
//!
//! Contains the secret document model, the uniform read-modify-write store
//! contract with its backends (in-memory, cluster secret, managed secret
//! service, vault path and the mirrored composite), the resolver that picks
//! a backend from the deployment requirements, and the completeness check
//! gating an install. Backend transport lives in `bootkeeper-storage`.

pub mod document;
pub mod error;
pub mod requirements;
pub mod resolver;
pub mod store;
pub mod verify;
pub mod workflow;

pub use document::{Node, SecretDocument};
pub use error::{
    DocumentError, GateError, RequirementsError, ResolveError, StoreError, VerifyError,
};
pub use requirements::{ClusterConfig, Requirements, SecretStorage};
pub use resolver::{BackendClients, KindResolver};
pub use store::{Kind, SecretStore};
