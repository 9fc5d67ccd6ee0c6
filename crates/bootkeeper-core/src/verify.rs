//! Completeness check run before the install job is triggered.

use crate::document::SecretDocument;
use crate::error::VerifyError;

/// Entries that must be present and non-empty, in reporting order.
pub const REQUIRED_PATHS: [&str; 6] = [
    "secrets.adminUser.username",
    "secrets.adminUser.password",
    "secrets.hmacToken",
    "secrets.pipelineUser.username",
    "secrets.pipelineUser.email",
    "secrets.pipelineUser.token",
];

/// Check that every required entry holds a non-empty scalar.
///
/// # Errors
///
/// Returns [`VerifyError::Missing`] naming the first required path, in
/// [`REQUIRED_PATHS`] order, that is absent, empty or not a scalar.
pub fn verify(document: &SecretDocument) -> Result<(), VerifyError> {
    match REQUIRED_PATHS
        .into_iter()
        .find(|path| document.get_text(path).is_none_or(|v| v.is_empty()))
    {
        Some(path) => Err(VerifyError::Missing { path }),
        None => Ok(()),
    }
}

/// Parse `text` and [`verify`] it.
///
/// # Errors
///
/// Returns [`VerifyError::Document`] if the text is not a secrets document,
/// otherwise as [`verify`].
pub fn verify_yaml(text: &str) -> Result<(), VerifyError> {
    verify(&SecretDocument::from_yaml(text)?)
}
