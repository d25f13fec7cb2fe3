//! Error types for the secret store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for secret store operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

#[derive(Error, Debug)]
pub enum SecretsError {
    /// A requested secret name is not declared in the manifest.
    #[error("Secret '{name}' is not declared")]
    UnknownSecret { name: String },

    /// A service id is not declared in the manifest.
    #[error("Service '{service}' is not declared")]
    UnknownService { service: String },

    /// The directory of a target service is absent. Non-fatal: the service is skipped.
    #[error("Target directory for service '{service}' does not exist: {dir}")]
    MissingTargetFile { service: String, dir: PathBuf },

    /// An existing value failed validation. Non-fatal under the regenerate policy.
    #[error("Secret '{name}' in {path} has an invalid format: {reason}")]
    InvalidSecretFormat { name: String, path: PathBuf, reason: String },

    /// An existing value failed validation and the policy forbids regeneration.
    #[error("Secret '{name}' in {path} is invalid and regeneration is disabled: {reason}")]
    PolicyViolation { name: String, path: PathBuf, reason: String },

    /// I/O error on a service configuration file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SecretsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
