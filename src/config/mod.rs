//! # Configuration Management
//!
//! Loads the deployment manifest (`stackctl.toml`) through the `config` crate:
//! the TOML file first, then `STACKCTL_`-prefixed environment variables with
//! `__` as the nesting separator (`STACKCTL_GATEWAY__ADMIN_URL`).
//!
//! The result is an explicit [`DeploymentConfig`] handed to every component at
//! construction. Components never read the environment themselves.

pub mod settings;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{Result, StackError};

pub use settings::{
    AuthKind, BackupConfig, ConsumerDeclaration, CredentialSource, DeploymentConfig,
    EndpointSource, GatewayConfig, InvalidSecretPolicy, PolicyConfig, ProviderAuth,
    ProviderConfig, ReadinessConfig, RetryConfig, SecretDeclaration, SecretTarget,
    ServiceDeclaration, StaticOperation,
};

/// Manifest file name looked up in the working directory
pub const DEFAULT_MANIFEST: &str = "stackctl.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "STACKCTL";

/// Load, finalize and validate the manifest at `path`.
///
/// The configuration root is the directory holding the manifest.
pub fn load_config(path: &Path) -> Result<DeploymentConfig> {
    if !path.is_file() {
        return Err(StackError::config(format!("Manifest not found: {}", path.display())));
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Toml).required(true))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"),
        )
        .build()?;

    let mut deployment: DeploymentConfig = settings.try_deserialize()?;

    let manifest = path
        .canonicalize()
        .map_err(|e| StackError::io(e, format!("Failed to resolve {}", path.display())))?;
    deployment.root = manifest.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

    if deployment.backup.temp_dir.is_none() {
        deployment.backup.temp_dir = Some(default_temp_dir(&deployment.root));
    }

    deployment.validate()?;

    debug!(
        root = %deployment.root.display(),
        services = deployment.services.len(),
        secrets = deployment.secrets.len(),
        providers = deployment.providers.len(),
        "Loaded deployment manifest"
    );

    Ok(deployment)
}

/// Volatile per-root location for temporary backups
fn default_temp_dir(root: &Path) -> PathBuf {
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    std::env::temp_dir().join(format!("stackctl-{}", &hex::encode(digest)[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_roots_relative_paths() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join(DEFAULT_MANIFEST);
        fs::write(
            &manifest,
            r#"
[[services]]
id = "api"
file = "api/.env"

[[secrets]]
name = "API_TOKEN"
targets = ["api"]
"#,
        )
        .unwrap();

        let config = load_config(&manifest).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.root, root);
        assert_eq!(config.resolve(Path::new("api/.env")), root.join("api/.env"));
        assert!(config.backup.temp_dir.is_some());
        assert_ne!(config.temp_backup_dir(), config.backup_dir());
    }

    #[test]
    fn test_missing_manifest_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, StackError::Configuration { .. }));
    }

    #[test]
    fn test_temp_dir_is_stable_per_root() {
        let a = default_temp_dir(Path::new("/srv/a"));
        assert_eq!(a, default_temp_dir(Path::new("/srv/a")));
        assert_ne!(a, default_temp_dir(Path::new("/srv/b")));
    }
}
