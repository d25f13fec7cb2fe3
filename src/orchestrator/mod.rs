//! # Orchestrator
//!
//! Sequences the components for each top-level operation. `setup` runs the
//! secret store, then the readiness probe, then the route provisioner; secret
//! propagation is complete and on disk before the first readiness request is
//! sent. Destructive operations take a temporary snapshot first.

pub mod summary;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::backup::{BackupKind, BackupManager};
use crate::config::DeploymentConfig;
use crate::errors::{Result, StackError};
use crate::gateway::{
    AdminClient, AdminClientConfig, Credentials, ReadinessProbe, RouteProvisioner,
};
use crate::operation_span;
use crate::secrets::{EnsureReport, SecretStore, SecretString};
use crate::utils::remove_path;

pub use summary::{RunSummary, SecretRow};

/// Which live files a cleanup removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupScope {
    /// Runtime state only; secrets are kept
    Runtime,
    /// Runtime state and every service configuration file
    Deep,
}

pub struct Orchestrator {
    config: Arc<DeploymentConfig>,
    secrets: SecretStore,
    backups: BackupManager,
    admin_key: Option<SecretString>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: DeploymentConfig, cancel: CancellationToken) -> Self {
        let secrets = SecretStore::new(&config);
        let backups = BackupManager::new(&config);
        Self { config: Arc::new(config), secrets, backups, admin_key: None, cancel }
    }

    /// Administrative key supplied by the caller; takes precedence over the manifest
    pub fn with_admin_key(mut self, key: Option<SecretString>) -> Self {
        self.admin_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Ensure secrets, wait for the gateway, reconcile routes
    pub async fn setup(&self) -> Result<RunSummary> {
        self.run_setup().instrument(operation_span!("setup")).await
    }

    async fn run_setup(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new("setup");
        self.check_cancelled()?;

        let store = self.secrets.clone();
        let report = tokio::task::spawn_blocking(move || store.ensure_all())
            .await
            .map_err(|e| StackError::internal(format!("secret store task failed: {}", e)))??;
        summary.record_secrets(&report);
        for failure in &report.failed {
            warn!(service = %failure.service, error = %failure.error, "Secret propagation failed for service");
        }
        info!(
            secrets = report.secrets.len(),
            written = report.written.len(),
            "Secrets ensured"
        );

        // Writes above are complete; later steps are abandoned on cancellation
        self.check_cancelled()?;

        let admin_key = self.admin_key(Some(&report))?;
        let client = self.admin_client(admin_key)?;

        let gateway = &self.config.gateway;
        ReadinessProbe::new(client.clone(), gateway.readiness_path(), &gateway.readiness)
            .wait_until_ready(&self.cancel)
            .await?;

        let credentials = Credentials::from_report(&report, self.secrets.clone());
        let provisioner = RouteProvisioner::new(client, self.config.clone(), credentials)?;
        let reconciled = provisioner.reconcile_all(&self.cancel).await?;
        summary.record_reconcile(reconciled);

        Ok(summary)
    }

    /// Permanent backup of the tracked files
    pub fn backup(&self, name: Option<&str>) -> Result<RunSummary> {
        let _span = operation_span!("backup").entered();
        let mut summary = RunSummary::new("backup");
        self.check_cancelled()?;

        let manifest = self.backups.snapshot(BackupKind::Permanent, name)?;
        let dir = self.config.backup_dir().join(&manifest.id);
        summary.backup = Some(manifest.summary(dir));
        Ok(summary)
    }

    pub fn recover(&self, selector: Option<&str>) -> Result<RunSummary> {
        let _span = operation_span!("recover").entered();
        let mut summary = RunSummary::new("recover");
        self.check_cancelled()?;

        let report = self.backups.restore(selector)?;
        if report.noop {
            summary.warnings.push("configuration root is clean; nothing was restored".to_string());
        }
        summary.restore = Some(report);
        Ok(summary)
    }

    pub fn cleanup(&self) -> Result<RunSummary> {
        self.destroy(CleanupScope::Runtime)
    }

    pub fn deep_cleanup(&self) -> Result<RunSummary> {
        self.destroy(CleanupScope::Deep)
    }

    pub fn list_backups(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new("list-backups");
        summary.backups = self.backups.list()?;
        Ok(summary)
    }

    pub fn delete_backup(&self, selector: &str) -> Result<RunSummary> {
        let _span = operation_span!("delete-backup").entered();
        let mut summary = RunSummary::new("delete-backup");
        self.check_cancelled()?;
        summary.backup = Some(self.backups.delete(selector)?);
        Ok(summary)
    }

    /// Delete every route this tool created
    pub async fn clear_routes(&self) -> Result<RunSummary> {
        self.run_clear_routes().instrument(operation_span!("clear-routes")).await
    }

    async fn run_clear_routes(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new("clear-routes");
        self.check_cancelled()?;

        let client = self.admin_client(self.admin_key(None)?)?;
        let credentials = Credentials::new(HashMap::new(), Some(self.secrets.clone()));
        let provisioner = RouteProvisioner::new(client, self.config.clone(), credentials)?;
        summary.record_clear(provisioner.clear_routes(&self.cancel).await?);
        Ok(summary)
    }

    fn destroy(&self, scope: CleanupScope) -> Result<RunSummary> {
        let operation = match scope {
            CleanupScope::Runtime => "cleanup",
            CleanupScope::Deep => "deep-cleanup",
        };
        let _span = operation_span!(operation).entered();
        let mut summary = RunSummary::new(operation);
        self.check_cancelled()?;

        if !self.backups.has_permanent()? {
            warn!("No permanent backup exists; only a temporary snapshot will be kept");
            summary.warnings.push(
                "no permanent backup exists; the temporary snapshot may not survive a host restart"
                    .to_string(),
            );
        }

        let snapshot = self.backups.snapshot(BackupKind::Temporary, Some(&format!("pre-{}", operation)))?;
        let dir = self.config.temp_backup_dir().join(&snapshot.id);
        summary.backup = Some(snapshot.summary(dir));

        let mut targets: Vec<&Path> = self.config.runtime_paths.iter().map(|p| p.as_path()).collect();
        if scope == CleanupScope::Deep {
            targets.extend(self.config.services.iter().map(|s| s.file.as_path()));
        }

        for rel in targets {
            let path = self.config.resolve(rel);
            let removed = remove_path(&path)
                .map_err(|e| StackError::io(e, format!("removing {}", path.display())))?;
            if removed {
                info!(path = %rel.display(), "Removed");
                summary.removed.push(rel.to_path_buf());
            }
        }

        self.backups.mark_cleaned()?;
        Ok(summary)
    }

    /// Caller-supplied key, then the canonical value of `admin_key_secret`,
    /// then the literal `gateway.admin_key`.
    fn admin_key(&self, ensured: Option<&EnsureReport>) -> Result<SecretString> {
        if let Some(key) = &self.admin_key {
            return Ok(key.clone());
        }

        let gateway = &self.config.gateway;
        if let Some(name) = &gateway.admin_key_secret {
            if ensured.and_then(|r| r.get(name)).is_some_and(|s| !s.persisted) {
                return Err(StackError::config(format!(
                    "Admin key secret '{}' was not written to any service file",
                    name
                )));
            }
            let value = match ensured.and_then(|r| r.value(name)) {
                Some(value) => Some(value.clone()),
                None => self.secrets.lookup(name)?,
            };
            if let Some(value) = value {
                return Ok(value);
            }
        }

        gateway.admin_key.clone().filter(|k| !k.is_empty()).ok_or_else(|| {
            StackError::config(
                "No administrative key: pass --admin-key, set gateway.admin_key_secret or gateway.admin_key",
            )
        })
    }

    fn admin_client(&self, key: SecretString) -> Result<AdminClient> {
        Ok(AdminClient::new(AdminClientConfig::from_gateway(&self.config.gateway, key))?)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(StackError::Cancelled)
        } else {
            Ok(())
        }
    }
}
