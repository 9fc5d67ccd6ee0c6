//! Storage error types.
//!
//! Every error variant names the target it was operating on (resource,
//! object or path) so a failure can be traced without a debugger. Reasons
//! come from the transport and never include secret payloads.

/// Errors that can occur while talking to a secret backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The client could not be constructed from its settings.
    #[error("invalid client configuration: {reason}")]
    Config { reason: String },

    /// Failed to read from the backend.
    #[error("failed to read '{target}': {reason}")]
    Read { target: String, reason: String },

    /// Failed to write to the backend.
    #[error("failed to write '{target}': {reason}")]
    Write { target: String, reason: String },

    /// Failed to delete from the backend.
    #[error("failed to delete '{target}': {reason}")]
    Delete { target: String, reason: String },

    /// Failed to list objects with the given prefix.
    #[error("failed to list objects with prefix '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    /// The backend returned data that could not be decoded.
    #[error("invalid data at '{target}': {reason}")]
    InvalidData { target: String, reason: String },
}
