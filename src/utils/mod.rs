//! Utility functions and helpers

pub mod fs;
pub mod retry;

use std::path::{Component, Path};

use regex::Regex;

pub use fs::{atomic_write, file_mode, remove_path, RootLock};
pub use retry::{Attempt, RetryExhausted, RetryPolicy};

/// Provider identifiers: letters, digits and hyphens only. Never contains `_`,
/// which route ids rely on as the provider/operation separator.
pub static PROVIDER_ID_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+$").unwrap());

/// Operation identifiers after normalisation
pub static OPERATION_ID_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Service identifiers and consumer usernames
pub static SERVICE_ID_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap());

/// Keys in service configuration files (shell-style variable names)
pub static CONFIG_KEY_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap());

/// Backup names
pub static BACKUP_NAME_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").unwrap());

/// Returns true when `path` is relative and cannot escape the directory it is
/// joined onto (no root, prefix or `..` components).
pub fn is_contained_relative(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    path.components().all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
