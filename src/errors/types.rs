//! # Error Types
//!
//! Crate-level error taxonomy for stackctl using `thiserror`. Component errors
//! (secrets, backups, readiness, provisioning) convert into [`StackError`] at the
//! orchestrator boundary, where they are mapped to process exit codes.

use std::fmt;

use crate::backup::BackupError;
use crate::gateway::{AdminError, ProvisionError, ReadinessError};
use crate::secrets::SecretsError;

/// Custom result type for stackctl operations
pub type Result<T> = std::result::Result<T, StackError>;

/// Main error type for stackctl
#[derive(thiserror::Error, Debug)]
pub enum StackError {
    /// Malformed provider/secret declarations. Fatal, raised before any mutation.
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Readiness or admin API calls exceeded their budget
    #[error("Operation timed out: {operation} after {elapsed_ms}ms (last error: {last_error})")]
    NetworkTimeout {
        operation: String,
        elapsed_ms: u64,
        last_error: String,
    },

    /// Admin API rejected the administrative credential
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Provider id/URL/interface description malformed
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Restore/delete selector did not resolve to exactly one backup
    #[error("Backup not found: {selector}")]
    BackupNotFound { selector: String },

    /// Another run holds the configuration root
    #[error("Configuration root is locked by another run: {path}")]
    Locked { path: String },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// The run was cancelled; in-flight writes completed, later steps abandoned
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Process exit codes reported by the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Configuration,
    PartialProvisioning,
    ReadinessTimeout,
    Authentication,
    BackupNotFound,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Configuration => 2,
            ExitStatus::PartialProvisioning => 3,
            ExitStatus::ReadinessTimeout => 4,
            ExitStatus::Authentication => 5,
            ExitStatus::BackupNotFound => 6,
            ExitStatus::Cancelled => 130,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitStatus::Success => "success",
            ExitStatus::Failure => "failure",
            ExitStatus::Configuration => "configuration_error",
            ExitStatus::PartialProvisioning => "partial_provisioning",
            ExitStatus::ReadinessTimeout => "readiness_timeout",
            ExitStatus::Authentication => "authentication_error",
            ExitStatus::BackupNotFound => "backup_not_found",
            ExitStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

impl StackError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Configuration { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>, E: Into<String>>(
        operation: S,
        elapsed_ms: u64,
        last_error: E,
    ) -> Self {
        Self::NetworkTimeout {
            operation: operation.into(),
            elapsed_ms,
            last_error: last_error.into(),
        }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Authentication { message: message.into() }
    }

    /// Create a backup-not-found error
    pub fn backup_not_found<S: Into<String>>(selector: S) -> Self {
        Self::BackupNotFound { selector: selector.into() }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Exit status the CLI reports for this error
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            StackError::Configuration { .. } => ExitStatus::Configuration,
            StackError::Validation { .. } => ExitStatus::Configuration,
            StackError::Locked { .. } => ExitStatus::Configuration,
            StackError::NetworkTimeout { .. } => ExitStatus::ReadinessTimeout,
            StackError::Authentication { .. } => ExitStatus::Authentication,
            StackError::BackupNotFound { .. } => ExitStatus::BackupNotFound,
            StackError::Cancelled => ExitStatus::Cancelled,
            StackError::Io { .. } => ExitStatus::Failure,
            StackError::Serialization { .. } => ExitStatus::Failure,
            StackError::Internal { .. } => ExitStatus::Failure,
        }
    }
}

impl From<std::io::Error> for StackError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for StackError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for StackError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for StackError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_validation_messages("", &errors, &mut messages);
        messages.sort();

        Self::config(format!("Validation failed: {}", messages.join("; ")))
    }
}

// Flattens nested struct and list errors into `a.b[0].c: message` entries
fn collect_validation_messages(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path =
            if prefix.is_empty() { field.to_string() } else { format!("{}.{}", prefix, field) };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                out.push(format!("{}: {}", path, error_messages.join(", ")));
            }
            ValidationErrorsKind::Struct(inner) => collect_validation_messages(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_validation_messages(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

impl From<SecretsError> for StackError {
    fn from(error: SecretsError) -> Self {
        match error {
            SecretsError::PolicyViolation { .. }
            | SecretsError::UnknownService { .. }
            | SecretsError::UnknownSecret { .. } => Self::config(error.to_string()),
            SecretsError::Io { source, path } => {
                Self::io(source, format!("secret store: {}", path.display()))
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<BackupError> for StackError {
    fn from(error: BackupError) -> Self {
        match error {
            BackupError::NotFound { selector } => Self::backup_not_found(selector),
            BackupError::InvalidName { .. } => Self::validation_field(error.to_string(), "name"),
            BackupError::Io { source, context } => Self::io(source, context),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<ReadinessError> for StackError {
    fn from(error: ReadinessError) -> Self {
        match error {
            ReadinessError::NotReady { phase, elapsed, last_error } => Self::timeout(
                format!("gateway readiness ({})", phase),
                elapsed.as_millis() as u64,
                last_error,
            ),
            ReadinessError::Unauthorized { .. } => Self::auth(error.to_string()),
            ReadinessError::Cancelled => Self::Cancelled,
            ReadinessError::InvalidEndpoint(message) => Self::config(message),
        }
    }
}

impl From<AdminError> for StackError {
    fn from(error: AdminError) -> Self {
        match error {
            AdminError::Unauthorized { .. } => Self::auth(error.to_string()),
            AdminError::Timeout { elapsed_ms, ref message } => {
                Self::timeout("admin API request", elapsed_ms, message.clone())
            }
            AdminError::Config(message) => Self::config(message),
            AdminError::Cancelled => Self::Cancelled,
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<ProvisionError> for StackError {
    fn from(error: ProvisionError) -> Self {
        match error {
            ProvisionError::Unauthorized { .. } => Self::auth(error.to_string()),
            ProvisionError::List(inner) => inner.into(),
            ProvisionError::Cancelled => Self::Cancelled,
            ProvisionError::Client(message) => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_error_creation() {
        let error = StackError::config("Test configuration error");
        assert!(matches!(error, StackError::Configuration { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_validation_error() {
        let error = StackError::validation_field("Invalid provider id", "providers.id");
        if let StackError::Validation { field, .. } = error {
            assert_eq!(field, Some("providers.id".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        assert_eq!(StackError::config("x").exit_status().code(), 2);
        assert_eq!(StackError::timeout("probe", 10, "refused").exit_status().code(), 4);
        assert_eq!(StackError::auth("x").exit_status().code(), 5);
        assert_eq!(StackError::backup_not_found("x").exit_status().code(), 6);
        assert_eq!(StackError::Cancelled.exit_status().code(), 130);
        assert_eq!(ExitStatus::PartialProvisioning.code(), 3);
    }

    #[test]
    fn test_readiness_conversion_keeps_diagnostics() {
        let error: StackError = ReadinessError::NotReady {
            phase: "authenticated",
            elapsed: Duration::from_millis(1500),
            last_error: "HTTP 401".to_string(),
        }
        .into();

        match error {
            StackError::NetworkTimeout { elapsed_ms, last_error, .. } => {
                assert_eq!(elapsed_ms, 1500);
                assert_eq!(last_error, "HTTP 401");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejected_admin_key_maps_to_authentication() {
        let error: StackError =
            ReadinessError::Unauthorized { elapsed: Duration::from_secs(60), status: 401 }.into();
        assert_eq!(error.exit_status(), ExitStatus::Authentication);

        let error: StackError =
            ProvisionError::Unauthorized { username: "backend".into(), status: 403 }.into();
        assert_eq!(error.exit_status().code(), 5);
    }

    #[test]
    fn test_backup_not_found_conversion() {
        let error: StackError = BackupError::NotFound { selector: "nightly".into() }.into();
        assert!(matches!(error, StackError::BackupNotFound { .. }));
    }

    #[test]
    fn test_secrets_policy_is_configuration_error() {
        let error: StackError = SecretsError::PolicyViolation {
            name: "GATEWAY_KEY".into(),
            path: PathBuf::from("gateway/.env"),
            reason: "too short".into(),
        }
        .into();
        assert_eq!(error.exit_status(), ExitStatus::Configuration);
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: StackError = io_error.into();
        assert!(matches!(error, StackError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: StackError = json_error.into();
        assert!(matches!(error, StackError::Serialization { .. }));
    }
}
