//! Resolution of CLI inputs that may come from flags, files or the environment
//!
//! This is the only place stackctl reads process environment variables other
//! than the `STACKCTL_*` manifest overrides handled by the config loader.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::DEFAULT_MANIFEST;
use crate::secrets::SecretString;

pub const MANIFEST_ENV: &str = "STACKCTL_CONFIG";
pub const ADMIN_KEY_ENV: &str = "STACKCTL_ADMIN_KEY";

/// Resolve the manifest path
///
/// Checks sources in the following priority order:
/// 1. --config command line flag
/// 2. STACKCTL_CONFIG environment variable
/// 3. ./stackctl.toml
pub fn resolve_manifest_path(config_flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = config_flag {
        debug!("Using manifest from --config flag: {}", path.display());
        return path;
    }

    if let Ok(path) = std::env::var(MANIFEST_ENV) {
        if !path.is_empty() {
            debug!("Using manifest from {} environment variable: {}", MANIFEST_ENV, path);
            return PathBuf::from(path);
        }
    }

    PathBuf::from(DEFAULT_MANIFEST)
}

/// Resolve an administrative key supplied outside the manifest
///
/// Checks sources in the following priority order:
/// 1. --admin-key command line flag
/// 2. --admin-key-file command line flag
/// 3. STACKCTL_ADMIN_KEY environment variable
///
/// Returns `None` when no source is set; the manifest is consulted next.
pub fn resolve_admin_key(
    key_flag: Option<String>,
    key_file_flag: Option<PathBuf>,
) -> Result<Option<SecretString>> {
    if let Some(key) = key_flag.filter(|k| !k.is_empty()) {
        debug!("Using administrative key from --admin-key flag");
        return Ok(Some(SecretString::new(key)));
    }

    if let Some(path) = key_file_flag {
        return read_key_file(&path).map(Some);
    }

    if let Ok(key) = std::env::var(ADMIN_KEY_ENV) {
        if !key.is_empty() {
            debug!("Using administrative key from {} environment variable", ADMIN_KEY_ENV);
            return Ok(Some(SecretString::new(key)));
        }
    }

    Ok(None)
}

fn read_key_file(path: &Path) -> Result<SecretString> {
    debug!("Reading administrative key from file: {}", path.display());
    let key = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file: {}", path.display()))?
        .trim()
        .to_string();

    if key.is_empty() {
        anyhow::bail!("Key file is empty: {}", path.display());
    }

    Ok(SecretString::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flag_wins_for_manifest_path() {
        let path = resolve_manifest_path(Some(PathBuf::from("/srv/stack/stackctl.toml")));
        assert_eq!(path, PathBuf::from("/srv/stack/stackctl.toml"));
    }

    #[test]
    fn test_admin_key_flag_wins_over_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("admin.key");
        std::fs::write(&file, "from-file\n").unwrap();

        let key = resolve_admin_key(Some("from-flag".into()), Some(file.clone())).unwrap().unwrap();
        assert_eq!(key.expose_secret(), "from-flag");

        let key = resolve_admin_key(None, Some(file)).unwrap().unwrap();
        assert_eq!(key.expose_secret(), "from-file");
    }

    #[test]
    fn test_empty_key_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("admin.key");
        std::fs::write(&file, "  \n").unwrap();

        assert!(resolve_admin_key(None, Some(file)).is_err());
    }
}
