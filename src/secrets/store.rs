//! Preserve-or-generate resolution and propagation of shared secrets.
//!
//! `ensure` runs in two passes. The resolve pass reads every target file,
//! adopts the first valid value in each secret's target order and generates
//! the rest; nothing is written until every secret has a canonical value, so
//! an `abort` policy violation leaves the filesystem untouched. The propagate
//! pass then rewrites each service file once, atomically, and only when its
//! rendered content actually changes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::env_file::EnvFile;
use super::error::{Result, SecretsError};
use super::generate;
use super::types::{Secret, SecretOrigin, SecretString};
use crate::config::{DeploymentConfig, InvalidSecretPolicy, SecretDeclaration, ServiceDeclaration};
use crate::utils::atomic_write;

const SECRET_FILE_MODE: u32 = 0o600;

/// A service file rewritten during `ensure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileWrite {
    pub service: String,
    pub path: PathBuf,
    pub created: bool,
}

/// A target service left untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedService {
    pub service: String,
    pub reason: String,
}

/// A service whose file could not be read or written; other services are unaffected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWrite {
    pub service: String,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnsureReport {
    /// Canonical secrets, in declaration order
    pub secrets: Vec<Secret>,
    pub written: Vec<FileWrite>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<SkippedService>,
    pub failed: Vec<FailedWrite>,
    /// Secrets whose existing value was invalid and got replaced
    pub regenerated: Vec<String>,
}

impl EnsureReport {
    pub fn get(&self, name: &str) -> Option<&Secret> {
        self.secrets.iter().find(|s| s.name == name)
    }

    /// Canonical value, provided it landed in at least one service file
    pub fn value(&self, name: &str) -> Option<&SecretString> {
        self.get(name).filter(|s| s.persisted).map(|s| &s.value)
    }

    /// Generated secrets that no service file holds, so no later run can recover them
    pub fn unpersisted(&self) -> impl Iterator<Item = &Secret> {
        self.secrets.iter().filter(|s| !s.persisted)
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

struct LoadedService {
    id: String,
    path: PathBuf,
    file: EnvFile,
    /// Content on disk; `None` when the file does not exist yet
    original: Option<String>,
    /// Seeded from a template, so its values are not real secrets
    seeded: bool,
}

/// Owns the service configuration files for the duration of a run
#[derive(Debug, Clone)]
pub struct SecretStore {
    root: PathBuf,
    services: Vec<ServiceDeclaration>,
    secrets: Vec<SecretDeclaration>,
    policy: InvalidSecretPolicy,
}

impl SecretStore {
    pub fn new(config: &DeploymentConfig) -> Self {
        Self {
            root: config.root.clone(),
            services: config.services.clone(),
            secrets: config.secrets.clone(),
            policy: config.policy.on_invalid,
        }
    }

    /// Ensure every declared secret
    pub fn ensure_all(&self) -> Result<EnsureReport> {
        let names: Vec<&str> = self.secrets.iter().map(|s| s.name.as_str()).collect();
        self.ensure(&names)
    }

    /// Resolve a canonical value for each named secret and propagate it into
    /// every target service file.
    pub fn ensure(&self, names: &[&str]) -> Result<EnsureReport> {
        let selected = names
            .iter()
            .map(|name| {
                self.secrets
                    .iter()
                    .find(|s| s.name == *name)
                    .ok_or_else(|| SecretsError::UnknownSecret { name: name.to_string() })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = EnsureReport::default();
        let mut loaded: BTreeMap<String, LoadedService> = BTreeMap::new();

        for service in self.targeted_services(&selected) {
            match self.load_service(service) {
                Ok(svc) => {
                    loaded.insert(svc.id.clone(), svc);
                }
                Err(SecretsError::MissingTargetFile { service, dir }) => {
                    warn!(service = %service, dir = %dir.display(), "Target service directory is absent, skipping");
                    report.skipped.push(SkippedService {
                        service,
                        reason: format!("directory {} does not exist", dir.display()),
                    });
                }
                Err(err) => {
                    warn!(service = %service.id, error = %err, "Failed to read service configuration");
                    report.failed.push(FailedWrite {
                        service: service.id.clone(),
                        path: self.root.join(&service.file),
                        error: err.to_string(),
                    });
                }
            }
        }

        for decl in &selected {
            let (secret, regenerated) = self.resolve(decl, &loaded)?;
            if regenerated {
                report.regenerated.push(decl.name.clone());
            }
            report.secrets.push(secret);
        }

        for svc in loaded.values_mut() {
            for secret in &report.secrets {
                let Some(decl) = selected.iter().find(|d| d.name == secret.name) else {
                    continue;
                };
                for target in decl.targets.iter().filter(|t| t.service() == svc.id) {
                    svc.file.set(target.key(&decl.name), secret.value.expose_secret());
                }
            }
        }

        // Propagate in manifest order so reports and logs are stable
        for service in &self.services {
            let Some(svc) = loaded.get(&service.id) else {
                continue;
            };
            let rendered = svc.file.render();
            if svc.original.as_deref() == Some(rendered.as_str()) {
                debug!(service = %svc.id, "Service configuration already up to date");
                report.unchanged.push(svc.id.clone());
                continue;
            }

            match atomic_write(&svc.path, rendered.as_bytes(), Some(SECRET_FILE_MODE)) {
                Ok(()) => {
                    info!(service = %svc.id, path = %svc.path.display(), "Wrote service configuration");
                    report.written.push(FileWrite {
                        service: svc.id.clone(),
                        path: svc.path.clone(),
                        created: svc.original.is_none(),
                    });
                }
                Err(err) => {
                    warn!(service = %svc.id, path = %svc.path.display(), error = %err, "Failed to write service configuration");
                    report.failed.push(FailedWrite {
                        service: svc.id.clone(),
                        path: svc.path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let landed: BTreeSet<&str> = report
            .written
            .iter()
            .map(|w| w.service.as_str())
            .chain(report.unchanged.iter().map(String::as_str))
            .collect();
        for secret in &mut report.secrets {
            if secret.persisted {
                continue;
            }
            let Some(decl) = selected.iter().find(|d| d.name == secret.name) else {
                continue;
            };
            secret.persisted = decl.targets.iter().any(|t| landed.contains(t.service()));
            if !secret.persisted {
                warn!(secret = %secret.name, "Generated secret was not written to any service file");
            }
        }

        Ok(report)
    }

    /// Read a single service-local value without modifying anything
    pub fn read_value(&self, service: &str, key: &str) -> Result<Option<String>> {
        let decl = self
            .services
            .iter()
            .find(|s| s.id == service)
            .ok_or_else(|| SecretsError::UnknownService { service: service.to_string() })?;

        let path = self.root.join(&decl.file);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(EnvFile::parse(&text)
                .get(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SecretsError::io(path, err)),
        }
    }

    /// Current value of a declared secret, read from its targets in precedence order
    pub fn lookup(&self, name: &str) -> Result<Option<SecretString>> {
        let decl = self
            .secrets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SecretsError::UnknownSecret { name: name.to_string() })?;

        for target in &decl.targets {
            if let Some(value) = self.read_value(target.service(), target.key(&decl.name))? {
                return Ok(Some(SecretString::new(value)));
            }
        }
        Ok(None)
    }

    fn targeted_services<'a>(&'a self, selected: &[&SecretDeclaration]) -> Vec<&'a ServiceDeclaration> {
        self.services
            .iter()
            .filter(|service| {
                selected.iter().any(|d| d.targets.iter().any(|t| t.service() == service.id))
            })
            .collect()
    }

    fn load_service(&self, service: &ServiceDeclaration) -> Result<LoadedService> {
        let path = self.root.join(&service.file);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        if !dir.is_dir() {
            return Err(SecretsError::MissingTargetFile { service: service.id.clone(), dir });
        }

        match fs::read_to_string(&path) {
            Ok(text) => Ok(LoadedService {
                id: service.id.clone(),
                path,
                file: EnvFile::parse(&text),
                original: Some(text),
                seeded: false,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let (file, seeded) = match &service.template {
                    Some(template) => match fs::read_to_string(self.root.join(template)) {
                        Ok(text) => {
                            debug!(service = %service.id, template = %template.display(), "Seeding configuration from template");
                            (EnvFile::parse(&text), true)
                        }
                        Err(err) if err.kind() == io::ErrorKind::NotFound => (EnvFile::default(), false),
                        Err(err) => return Err(SecretsError::io(self.root.join(template), err)),
                    },
                    None => (EnvFile::default(), false),
                };
                Ok(LoadedService { id: service.id.clone(), path, file, original: None, seeded })
            }
            Err(err) => Err(SecretsError::io(path, err)),
        }
    }

    fn resolve(
        &self,
        decl: &SecretDeclaration,
        loaded: &BTreeMap<String, LoadedService>,
    ) -> Result<(Secret, bool)> {
        let mut canonical: Option<(String, String)> = None;
        let mut invalid_seen = false;

        for target in &decl.targets {
            let Some(svc) = loaded.get(target.service()) else {
                continue;
            };
            if svc.seeded {
                continue;
            }
            let Some(value) = svc.file.get(target.key(&decl.name)).filter(|v| !v.is_empty()) else {
                continue;
            };

            if let Err(reason) = generate::validate(decl.class, value, decl.min_length) {
                if self.policy == InvalidSecretPolicy::Abort {
                    return Err(SecretsError::PolicyViolation {
                        name: decl.name.clone(),
                        path: svc.path.clone(),
                        reason,
                    });
                }
                let err = SecretsError::InvalidSecretFormat {
                    name: decl.name.clone(),
                    path: svc.path.clone(),
                    reason,
                };
                warn!(secret = %decl.name, service = %svc.id, "{}", err);
                invalid_seen = true;
                continue;
            }

            match &canonical {
                None => canonical = Some((svc.id.clone(), value.to_string())),
                Some((source, adopted)) if adopted != value => {
                    warn!(
                        secret = %decl.name,
                        adopted_from = %source,
                        service = %svc.id,
                        "Services hold different values; the earlier target wins"
                    );
                }
                Some(_) => {}
            }
        }

        let secret = match canonical {
            Some((source, value)) => {
                debug!(secret = %decl.name, service = %source, "Preserving existing secret");
                Secret {
                    name: decl.name.clone(),
                    value: SecretString::new(value),
                    origin: SecretOrigin::Preserved,
                    class: decl.class,
                    source_service: Some(source),
                    persisted: true,
                }
            }
            None => {
                info!(secret = %decl.name, class = %decl.class, "Generating new secret");
                Secret {
                    name: decl.name.clone(),
                    value: generate::generate(decl.class),
                    origin: SecretOrigin::Generated,
                    class: decl.class,
                    source_service: None,
                    persisted: false,
                }
            }
        };

        let regenerated = invalid_seen && secret.is_generated();
        Ok((secret, regenerated))
    }
}
