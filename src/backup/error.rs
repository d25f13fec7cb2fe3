//! Error types for the backup manager.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    /// No backup, or more than one equally good candidate, matches the selector
    #[error("No unique backup matches '{selector}'")]
    NotFound { selector: String },

    #[error("Invalid backup name '{name}': use letters, digits, '.', '_' or '-'")]
    InvalidName { name: String },

    /// Captured content does not match the manifest; nothing was restored
    #[error("Backup '{id}' is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },
}

impl BackupError {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io { source, context: context.into() }
    }

    pub fn serialization(source: serde_json::Error, context: impl Into<String>) -> Self {
        Self::Serialization { source, context: context.into() }
    }
}
