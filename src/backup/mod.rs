//! # Backup and Recovery
//!
//! Temporary and permanent snapshots of the tracked configuration files, and
//! the per-root lifecycle state that makes restore safely repeatable.
//!
//! Temporary backups live in a volatile location (the system temp directory
//! unless `backup.temp_dir` says otherwise) and may not survive a host
//! restart. Take a permanent backup before destructive operations.

pub mod error;
pub mod manager;
pub mod manifest;
pub mod state;

pub use error::{BackupError, Result};
pub use manager::{BackupManager, RestoreReport};
pub use manifest::{BackupKind, BackupManifest, BackupSummary, ManifestEntry};
pub use state::LifecycleState;
